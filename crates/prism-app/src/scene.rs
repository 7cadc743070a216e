// SPDX-License-Identifier: CEPL-1.0
//! The demo scene and its blocking present loop.
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use prism_render::{ImageAsset, MeshAsset, RenderSize, Vertex};
use prism_render_vk::{
    AshDevice, ChainSettings, DescriptorBinding, DescriptorKind, DescriptorPool, FrameSync,
    GpuBuffer, GpuDevice, ImmediateUploader, MemoryAllocator, PresentChain, Rebuild,
    ResourceEntity, ShaderSet, SharedDevice, TextureFactory, Uploader,
};
use tracing::{debug, info};

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/prism.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/prism.frag.spv"));

/// Shader resource contract shared by both stages.
const BINDINGS: [DescriptorBinding; 2] = [
    DescriptorBinding::new(0, DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
    DescriptorBinding::new(
        1,
        DescriptorKind::CombinedImageSampler,
        vk::ShaderStageFlags::FRAGMENT,
    ),
];

pub struct SceneOptions {
    pub chain: ChainSettings,
    pub checker_cell: u32,
    pub spin_speed: f32,
}

// STRICT TEARDOWN ORDER (Drop + field order):
// - device idle (Drop), then the semaphores
// - chain (command buffers, pipeline, framebuffers, swapchain)
// - entities (geometry, then the shared texture once the last holder goes)
// - uniform buffer, descriptor pool, upload pool
pub struct Scene {
    sync: FrameSync,
    chain: PresentChain,
    entities: Vec<ResourceEntity>,
    ubo: GpuBuffer,
    _descriptors: DescriptorPool,
    _uploader: ImmediateUploader,
    device: Rc<AshDevice>,
    size: RenderSize,
    needs_rebuild: bool,
    spin_speed: f32,
    started: Instant,
}

impl Scene {
    pub fn new(device: &Rc<AshDevice>, size: RenderSize, opts: SceneOptions) -> Result<Self> {
        let shared: SharedDevice = device.clone();
        let shaders = ShaderSet::from_spv_bytes(VERT_SPV, FRAG_SPV).context("embedded shaders")?;

        let uploader = ImmediateUploader::new(MemoryAllocator::new(shared.clone()))?;
        let checker = ImageAsset::checkerboard(
            64,
            64,
            opts.checker_cell,
            [235, 235, 235, 255],
            [40, 40, 48, 255],
        )?;
        let texture = Rc::new(TextureFactory::new(&uploader).from_asset(&checker)?);

        let ubo = uploader
            .allocator()
            .create_uniform_buffer(std::mem::size_of::<Mat4>() as vk::DeviceSize)?;
        let descriptors = DescriptorPool::for_bindings(&shared, &BINDINGS, 1)?;

        let chain = PresentChain::new(&shared, opts.chain, shaders, &BINDINGS, size, &[])
            .context("present chain")?;

        let set = descriptors
            .allocate(chain.descriptor_layout(), 1)?
            .pop()
            .ok_or_else(|| anyhow!("descriptor pool returned no set"))?;
        descriptors.write_uniform_buffer(set, 0, &ubo);
        descriptors.write_texture(set, 1, &texture);

        let entities = vec![
            ResourceEntity::from_mesh(&uploader, &quad())?
                .with_texture(Rc::clone(&texture))
                .with_descriptor_sets(vec![set]),
            ResourceEntity::from_mesh(&uploader, &triangle())?
                .with_texture(texture)
                .with_descriptor_sets(vec![set]),
        ];
        chain.record(&entities)?;

        let sync = FrameSync::new(&shared)?;

        info!(entities = entities.len(), "scene ready");
        let scene = Self {
            sync,
            chain,
            entities,
            ubo,
            _descriptors: descriptors,
            _uploader: uploader,
            device: device.clone(),
            size,
            needs_rebuild: false,
            spin_speed: opts.spin_speed,
            started: Instant::now(),
        };
        scene.write_transform()?;
        Ok(scene)
    }

    /// Rebuilds lazily before the next frame.
    pub fn resize(&mut self, size: RenderSize) {
        self.size = size;
        self.needs_rebuild = true;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.chain.set_clear_color(rgba);
        self.chain.record(&self.entities)?;
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // 1) acquire_next_image (signals image_available)
    // 2) queue_submit (waits image_available, signals render_finished)
    // 3) queue_present (waits render_finished)
    // 4) queue_wait_idle, so every object is reusable for the next frame
    pub fn draw(&mut self) -> Result<()> {
        if self.needs_rebuild || !self.chain.is_ready() {
            match self.chain.rebuild(self.size, &self.entities)? {
                Rebuild::Applied(extent) => {
                    debug!(width = extent.width, height = extent.height, "scene rebuilt");
                    self.needs_rebuild = false;
                }
                Rebuild::Deferred => return Ok(()),
            }
        }
        let swapchain = self
            .chain
            .swapchain()
            .map(|s| s.handle())
            .ok_or_else(|| anyhow!("present chain has no swapchain"))?;

        let loader = self.device.swapchain_loader();
        let acquired = unsafe {
            loader.acquire_next_image(
                swapchain,
                u64::MAX,
                self.sync.image_available(),
                vk::Fence::null(),
            )
        };
        let index = match acquired {
            Ok((index, suboptimal)) => {
                self.needs_rebuild |= suboptimal;
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_rebuild = true;
                return Ok(());
            }
            Err(e) => return Err(e).context("acquire_next_image"),
        };

        self.write_transform()?;

        let image_available = self.sync.image_available();
        let render_finished = self.sync.render_finished();
        let cmd = self
            .chain
            .command_buffers()
            .get(index as usize)
            .copied()
            .ok_or_else(|| anyhow!("no command buffer for swapchain image {index}"))?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_finished,
            ..Default::default()
        };
        let queue = self.device.graphics_queue();
        let d = self.device.raw();
        unsafe { d.queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null()) }
            .context("queue_submit")?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &index,
            ..Default::default()
        };
        match unsafe { loader.queue_present(queue, &present) } {
            Ok(suboptimal) => self.needs_rebuild |= suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => self.needs_rebuild = true,
            Err(e) => return Err(e).context("queue_present"),
        }
        unsafe { d.queue_wait_idle(queue) }.context("queue_wait_idle")?;
        Ok(())
    }

    /// Aspect-corrected orthographic projection times a slow spin about Z.
    fn write_transform(&self) -> Result<()> {
        let extent = self.chain.extent();
        let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
        let proj = Mat4::orthographic_rh(-aspect, aspect, -1.0, 1.0, -1.0, 1.0);
        let angle = self.started.elapsed().as_secs_f32() * self.spin_speed;
        let mvp = proj * Mat4::from_axis_angle(Vec3::Z, angle);
        self.ubo.write(0, bytemuck::bytes_of(&mvp))?;
        Ok(())
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        // the fields below may still be in use by the last frame
        unsafe { self.device.raw().device_wait_idle() }.ok();
    }
}

fn quad() -> MeshAsset {
    MeshAsset {
        vertices: vec![
            Vertex::new([-0.9, -0.4, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0]),
            Vertex::new([-0.1, -0.4, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0]),
            Vertex::new([-0.1, 0.4, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
            Vertex::new([-0.9, 0.4, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]),
        ],
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

fn triangle() -> MeshAsset {
    MeshAsset {
        vertices: vec![
            Vertex::new([0.5, -0.4, 0.0], [1.0, 0.2, 0.2], [0.5, 0.0]),
            Vertex::new([0.9, 0.4, 0.0], [0.2, 1.0, 0.2], [1.0, 1.0]),
            Vertex::new([0.1, 0.4, 0.0], [0.2, 0.2, 1.0], [0.0, 1.0]),
        ],
        indices: Vec::new(),
    }
}
