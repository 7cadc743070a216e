// SPDX-License-Identifier: CEPL-1.0
//! Host → device transfers through transient staging buffers.
use std::fmt;

use ash::vk;
use tracing::debug;

use crate::device::{GpuDevice, SharedDevice};
use crate::error::{GpuError, GpuResult};
use crate::memory::{GpuBuffer, GpuImage, MemoryAllocator};

/// How data reaches device-local memory.
///
/// Callers only rely on "when this returns `Ok`, the data is resident", so a
/// batched or asynchronous implementation can stand in for [`ImmediateUploader`].
pub trait Uploader {
    fn allocator(&self) -> &MemoryAllocator;

    /// Creates a device-local buffer usable as `final_usage` holding `bytes`.
    fn upload_buffer(&self, bytes: &[u8], final_usage: vk::BufferUsageFlags)
        -> GpuResult<GpuBuffer>;

    /// Fills `image` with `bytes` and leaves it shader-read-only.
    fn upload_image(&self, bytes: &[u8], image: &GpuImage) -> GpuResult<()>;
}

/// Stage and access masks for one of the supported layout transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Only forward transitions along undefined → transfer-dst → shader-read
    /// are accepted.
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> GpuResult<Self> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (from, to) => return Err(GpuError::LayoutTransition { from, to }),
        };
        Ok(Self {
            old,
            new,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }

    pub fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: self.src_access,
            dst_access_mask: self.dst_access,
            old_layout: self.old,
            new_layout: self.new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: color_subresource_range(),
            ..Default::default()
        }
    }

    unsafe fn record(&self, device: &dyn GpuDevice, cmd: vk::CommandBuffer, image: vk::Image) {
        let barrier = self.barrier(image);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                std::slice::from_ref(&barrier),
            )
        };
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Blocking uploader: every transfer is its own one-time submission followed
/// by a queue-idle wait.
///
/// Simple and free of lifetime hazards for the staging buffer, but it stalls
/// the calling thread once per upload.
pub struct ImmediateUploader {
    allocator: MemoryAllocator,
    pool: vk::CommandPool,
    queue: vk::Queue,
}

impl ImmediateUploader {
    pub fn new(allocator: MemoryAllocator) -> GpuResult<Self> {
        let device = allocator.device();
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.graphics_queue_family(),
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info) }
            .map_err(GpuError::creation("transfer command pool"))?;
        let queue = device.graphics_queue();
        Ok(Self {
            allocator,
            pool,
            queue,
        })
    }

    fn device(&self) -> &SharedDevice {
        self.allocator.device()
    }

    /// Copies `bytes` into a fresh device-local buffer of `size` bytes.
    ///
    /// The staging buffer lives only for the duration of this call and is
    /// released whether or not the transfer succeeded.
    pub fn upload_via_staging(
        &self,
        bytes: &[u8],
        size: vk::DeviceSize,
        final_usage: vk::BufferUsageFlags,
    ) -> GpuResult<GpuBuffer> {
        let staging = self.staging(bytes, size)?;
        let dst = self.allocator.create_buffer(
            size,
            final_usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.submit_once(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.handle(), dst.handle(), std::slice::from_ref(&region));
        })?;
        drop(staging);

        debug!(size, ?final_usage, "buffer uploaded");
        Ok(dst)
    }

    fn staging(&self, bytes: &[u8], size: vk::DeviceSize) -> GpuResult<GpuBuffer> {
        if bytes.len() as vk::DeviceSize > size {
            return Err(GpuError::InvalidInput(format!(
                "{} bytes do not fit a {size} byte upload",
                bytes.len()
            )));
        }
        let staging = self.allocator.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(0, bytes)?;
        Ok(staging)
    }

    /// Records `record` into a one-time command buffer, submits it and waits
    /// for the queue to drain. The command buffer is always returned to the pool.
    fn submit_once(&self, record: impl FnOnce(&dyn GpuDevice, vk::CommandBuffer)) -> GpuResult<()> {
        let device = self.device();
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { device.allocate_command_buffers(&ai) }
            .map_err(GpuError::creation("transfer command buffer"))?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidInput("driver returned no command buffer".into()))?;

        let outcome = self.record_and_wait(cmd, record);
        unsafe { device.free_command_buffers(self.pool, std::slice::from_ref(&cmd)) };
        outcome
    }

    fn record_and_wait(
        &self,
        cmd: vk::CommandBuffer,
        record: impl FnOnce(&dyn GpuDevice, vk::CommandBuffer),
    ) -> GpuResult<()> {
        let device: &dyn GpuDevice = &**self.device();
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { device.begin_command_buffer(cmd, &bi) }.map_err(GpuError::recording("begin"))?;
        record(device, cmd);
        unsafe { device.end_command_buffer(cmd) }.map_err(GpuError::recording("end"))?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        unsafe {
            device
                .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())
                .map_err(|result| GpuError::Submission { result })?;
            device
                .queue_wait_idle(self.queue)
                .map_err(|result| GpuError::Submission { result })?;
        }
        Ok(())
    }
}

impl Uploader for ImmediateUploader {
    fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    fn upload_buffer(
        &self,
        bytes: &[u8],
        final_usage: vk::BufferUsageFlags,
    ) -> GpuResult<GpuBuffer> {
        self.upload_via_staging(bytes, bytes.len() as vk::DeviceSize, final_usage)
    }

    fn upload_image(&self, bytes: &[u8], image: &GpuImage) -> GpuResult<()> {
        let extent = image.extent();
        // the copy region always covers the whole RGBA8 image
        let expected = extent.width as u64 * extent.height as u64 * 4;
        if bytes.len() as u64 != expected {
            return Err(GpuError::InvalidInput(format!(
                "{}x{} image needs {expected} bytes, got {}",
                extent.width,
                extent.height,
                bytes.len()
            )));
        }
        let to_transfer =
            LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        let to_sampled = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        let staging = self.staging(bytes, bytes.len() as vk::DeviceSize)?;

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };

        // transfer-dst must be reached before the copy, shader-read only after it
        self.submit_once(|device, cmd| unsafe {
            to_transfer.record(device, cmd, image.handle());
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            to_sampled.record(device, cmd, image.handle());
        })?;
        drop(staging);

        debug!(width = extent.width, height = extent.height, "image uploaded");
        Ok(())
    }
}

impl fmt::Debug for ImmediateUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateUploader")
            .field("pool", &self.pool)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Drop for ImmediateUploader {
    fn drop(&mut self) {
        unsafe { self.device().destroy_command_pool(self.pool) };
    }
}
