// SPDX-License-Identifier: CEPL-1.0
//! Command pool ownership and the baked per-framebuffer draw streams.
use std::fmt;

use ash::vk;
use tracing::debug;

use crate::device::{GpuDevice, Owned, SharedDevice};
use crate::entity::ResourceEntity;
use crate::error::{GpuError, GpuResult};
use crate::pipeline::{full_viewport, GraphicsPipeline};
use crate::render_pass::RenderPass;

/// A command pool on the graphics family and one primary command buffer per
/// framebuffer.
pub struct CommandRecorder {
    buffers: Vec<vk::CommandBuffer>,
    pool: Owned<vk::CommandPool>,
    device: SharedDevice,
    clear_color: [f32; 4],
}

impl CommandRecorder {
    pub fn new(device: &SharedDevice, clear_color: [f32; 4]) -> GpuResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.graphics_queue_family(),
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info) }
            .map_err(GpuError::creation("command pool"))?;
        Ok(Self {
            buffers: Vec::new(),
            pool: Owned::new(device.clone(), pool, |d, p| unsafe { d.destroy_command_pool(p) }),
            device: device.clone(),
            clear_color,
        })
    }

    /// Replaces the current buffers with exactly `count` fresh primary ones.
    pub fn allocate(&mut self, count: usize) -> GpuResult<()> {
        self.free_command_buffers();
        if count == 0 {
            return Ok(());
        }
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool.get(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(GpuError::creation("command buffers"))?;
        debug!(count, "command buffers allocated");
        Ok(())
    }

    /// Re-records every buffer from scratch; buffer `i` targets `framebuffers[i]`.
    pub fn record(
        &self,
        render_pass: &RenderPass,
        framebuffers: &[vk::Framebuffer],
        extent: vk::Extent2D,
        pipeline: &GraphicsPipeline,
        entities: &[ResourceEntity],
    ) -> GpuResult<()> {
        if framebuffers.len() != self.buffers.len() {
            return Err(GpuError::InvalidInput(format!(
                "{} framebuffers but {} command buffers",
                framebuffers.len(),
                self.buffers.len()
            )));
        }
        let device: &dyn GpuDevice = &*self.device;
        for (&cmd, &framebuffer) in self.buffers.iter().zip(framebuffers) {
            unsafe {
                self.record_one(device, cmd, render_pass, framebuffer, extent, pipeline, entities)?
            };
        }
        debug!(
            buffers = self.buffers.len(),
            entities = entities.len(),
            "draw commands recorded"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn record_one(
        &self,
        device: &dyn GpuDevice,
        cmd: vk::CommandBuffer,
        render_pass: &RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: &GraphicsPipeline,
        entities: &[ResourceEntity],
    ) -> GpuResult<()> {
        // the pool allows per-buffer reset, so begin discards the old stream
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(cmd, &begin) }
            .map_err(GpuError::recording("begin"))?;

        let clears = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: render_pass.handle(),
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let viewport = full_viewport(extent);

        unsafe {
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            device.cmd_set_viewport(cmd, std::slice::from_ref(&viewport));
            device.cmd_set_line_width(cmd, 1.0);

            for entity in entities {
                if !entity.descriptor_sets().is_empty() {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        pipeline.layout(),
                        0,
                        entity.descriptor_sets(),
                    );
                }
                let vbuf = entity.vertex_buffer().handle();
                device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&vbuf), &[0]);
                if let Some(ibuf) = entity.index_buffer() {
                    device.cmd_bind_index_buffer(cmd, ibuf.handle(), 0, vk::IndexType::UINT32);
                }
                if entity.index_count() > 0 {
                    device.cmd_draw_indexed(cmd, entity.index_count(), 1, 0, 0, 0);
                } else {
                    device.cmd_draw(cmd, entity.vertex_count(), 1, 0, 0);
                }
            }

            device.cmd_end_render_pass(cmd);
        }
        unsafe { device.end_command_buffer(cmd) }.map_err(GpuError::recording("end"))?;
        Ok(())
    }

    /// Returns the buffers to the pool; the pool itself stays alive.
    pub fn free_command_buffers(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe { self.device.free_command_buffers(self.pool.get(), &self.buffers) };
        self.buffers.clear();
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool.get()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Takes effect on the next [`record`](Self::record).
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }
}

impl fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("pool", &self.pool)
            .field("buffers", &self.buffers)
            .field("clear_color", &self.clear_color)
            .finish_non_exhaustive()
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        self.free_command_buffers();
    }
}
