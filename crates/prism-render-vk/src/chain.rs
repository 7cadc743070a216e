// SPDX-License-Identifier: CEPL-1.0
//! The swapchain-dependent resource graph.
//!
//! swapchain images → render pass → framebuffers → pipeline → command
//! buffers. Everything downstream of the swapchain is rebuilt together
//! through [`PresentChain::rebuild`]; nothing is patched in place.
use std::fmt;

use ash::vk;
use prism_render::RenderSize;
use tracing::{debug, info};

use crate::commands::CommandRecorder;
use crate::device::SharedDevice;
use crate::entity::ResourceEntity;
use crate::error::{GpuError, GpuResult};
use crate::pipeline::{
    DescriptorBinding, DescriptorLayout, GraphicsPipeline, PipelineSettings, ShaderSet,
};
use crate::render_pass::RenderPass;
use crate::swapchain::{negotiate_extent, SwapchainCoordinator, SwapchainPreferences};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainSettings {
    pub clear_color: [f32; 4],
    pub swapchain: SwapchainPreferences,
    pub pipeline: PipelineSettings,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            swapchain: SwapchainPreferences::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Outcome of [`PresentChain::rebuild`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuild {
    /// Everything was recreated at the new extent and re-recorded.
    Applied(vk::Extent2D),
    /// The surface has no area (minimized); the old targets were kept.
    Deferred,
}

/// Targets that depend on the swapchain extent/format.
///
/// Teardown: pipeline, framebuffers, render pass, image views, swapchain.
struct ChainTargets {
    pipeline: Option<GraphicsPipeline>,
    render_pass: RenderPass,
    swapchain: SwapchainCoordinator,
}

impl ChainTargets {
    fn build(
        device: &SharedDevice,
        settings: &ChainSettings,
        shaders: &ShaderSet,
        layout: &DescriptorLayout,
        size: RenderSize,
    ) -> GpuResult<Self> {
        let swapchain = SwapchainCoordinator::new(device, size, &settings.swapchain)?;
        let render_pass = RenderPass::new(device, swapchain.format())?;
        let mut targets = Self {
            pipeline: None,
            render_pass,
            swapchain,
        };
        targets.swapchain.create_framebuffers(&targets.render_pass)?;
        targets.pipeline = Some(GraphicsPipeline::build(
            device,
            &targets.render_pass,
            targets.swapchain.extent(),
            shaders,
            layout,
            &settings.pipeline,
        )?);
        Ok(targets)
    }

    fn pipeline(&self) -> GpuResult<&GraphicsPipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| GpuError::InvalidInput("pipeline has not been built".into()))
    }
}

impl Drop for ChainTargets {
    fn drop(&mut self) {
        self.pipeline.take();
        self.swapchain.destroy_framebuffers();
    }
}

pub struct PresentChain {
    targets: Option<ChainTargets>,
    recorder: CommandRecorder,
    layout: DescriptorLayout,
    shaders: ShaderSet,
    settings: ChainSettings,
    extent: vk::Extent2D,
    device: SharedDevice,
}

impl PresentChain {
    /// Builds every target at `size`, allocates one command buffer per
    /// framebuffer and records `entities` into them.
    pub fn new(
        device: &SharedDevice,
        settings: ChainSettings,
        shaders: ShaderSet,
        bindings: &[DescriptorBinding],
        size: RenderSize,
        entities: &[ResourceEntity],
    ) -> GpuResult<Self> {
        let layout = DescriptorLayout::new(device, bindings)?;
        let recorder = CommandRecorder::new(device, settings.clear_color)?;
        let targets = ChainTargets::build(device, &settings, &shaders, &layout, size)?;
        let extent = targets.swapchain.extent();

        let mut chain = Self {
            targets: Some(targets),
            recorder,
            layout,
            shaders,
            settings,
            extent,
            device: device.clone(),
        };
        chain.allocate_and_record(entities)?;
        info!(
            width = extent.width,
            height = extent.height,
            images = chain.recorder.command_buffers().len(),
            "present chain ready"
        );
        Ok(chain)
    }

    /// Rebuilds every swapchain-dependent object for `size`.
    ///
    /// A zero-area surface defers without touching anything. Otherwise the
    /// device is drained, the old targets are torn down completely and then
    /// recreated, and `entities` are recorded into fresh command buffers.
    pub fn rebuild(&mut self, size: RenderSize, entities: &[ResourceEntity]) -> GpuResult<Rebuild> {
        let extent = negotiate_extent(&self.device, size)?;
        if extent.width == 0 || extent.height == 0 {
            debug!("surface has zero area, rebuild deferred");
            return Ok(Rebuild::Deferred);
        }

        unsafe { self.device.device_wait_idle() }
            .map_err(|result| GpuError::Submission { result })?;
        self.recorder.free_command_buffers();
        self.targets = None;

        let targets =
            ChainTargets::build(&self.device, &self.settings, &self.shaders, &self.layout, size)?;
        self.extent = targets.swapchain.extent();
        self.targets = Some(targets);
        self.allocate_and_record(entities)?;

        info!(
            width = self.extent.width,
            height = self.extent.height,
            "present chain rebuilt"
        );
        Ok(Rebuild::Applied(self.extent))
    }

    /// Re-records the existing command buffers, e.g. after the entity list
    /// changed. Nothing is reallocated.
    pub fn record(&self, entities: &[ResourceEntity]) -> GpuResult<()> {
        let targets = self.targets()?;
        self.recorder.record(
            &targets.render_pass,
            &targets.swapchain.framebuffers(),
            targets.swapchain.extent(),
            targets.pipeline()?,
            entities,
        )
    }

    fn allocate_and_record(&mut self, entities: &[ResourceEntity]) -> GpuResult<()> {
        let count = self.targets()?.swapchain.framebuffer_count();
        self.recorder.allocate(count)?;
        self.record(entities)
    }

    fn targets(&self) -> GpuResult<&ChainTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| GpuError::InvalidInput("present chain has no live targets".into()))
    }

    /// `false` after a rebuild failed half way; the next successful
    /// [`rebuild`](Self::rebuild) restores it.
    pub fn is_ready(&self) -> bool {
        self.targets.is_some()
    }

    pub fn swapchain(&self) -> Option<&SwapchainCoordinator> {
        self.targets.as_ref().map(|t| &t.swapchain)
    }

    pub fn render_pass(&self) -> Option<&RenderPass> {
        self.targets.as_ref().map(|t| &t.render_pass)
    }

    pub fn pipeline(&self) -> Option<&GraphicsPipeline> {
        self.targets.as_ref().and_then(|t| t.pipeline.as_ref())
    }

    pub fn descriptor_layout(&self) -> &DescriptorLayout {
        &self.layout
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        self.recorder.command_buffers()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.swapchain()
            .map_or(0, SwapchainCoordinator::framebuffer_count)
    }

    /// Extent of the last successful build.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    /// Takes effect on the next [`record`](Self::record) or rebuild.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.settings.clear_color = rgba;
        self.recorder.set_clear_color(rgba);
    }
}

impl fmt::Debug for PresentChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentChain")
            .field("swapchain", &self.swapchain())
            .field("pipeline", &self.pipeline())
            .field("recorder", &self.recorder)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl Drop for PresentChain {
    fn drop(&mut self) {
        unsafe { self.device.device_wait_idle() }.ok();
        self.recorder.free_command_buffers();
        self.targets = None;
    }
}
