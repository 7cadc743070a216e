// SPDX-License-Identifier: CEPL-1.0
//! The seam between the renderer and the raw Vulkan entry points.
//!
//! Every component talks to the GPU through [`GpuDevice`]. [`AshDevice`] is the
//! real implementation; tests substitute a recording double. The methods
//! mirror `ash::Device` (minus allocation callbacks) and carry the same safety
//! contract: handles must be valid and created from this device, and any
//! pointers inside create-info structs must be live for the call.
use std::fmt;
use std::rc::Rc;

use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;

/// Shared, read-only device handle injected into every component.
pub type SharedDevice = Rc<dyn GpuDevice>;

#[allow(clippy::missing_safety_doc)]
pub trait GpuDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn graphics_queue(&self) -> vk::Queue;
    fn graphics_queue_family(&self) -> u32;
    /// Surface every swapchain from this device presents to.
    fn surface(&self) -> vk::SurfaceKHR;

    // --- surface / swapchain ---
    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR)
        -> VkResult<vk::SwapchainKHR>;
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // --- memory ---
    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory>;
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut u8>;
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);

    // --- buffers ---
    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;

    // --- images ---
    unsafe fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image>;
    unsafe fn destroy_image(&self, image: vk::Image);
    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler>;
    unsafe fn destroy_sampler(&self, sampler: vk::Sampler);

    // --- render pass / framebuffers ---
    unsafe fn create_render_pass(&self, info: &vk::RenderPassCreateInfo)
        -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo)
        -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // --- synchronization ---
    unsafe fn create_semaphore(&self, info: &vk::SemaphoreCreateInfo) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // --- pipelines ---
    unsafe fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo,
    ) -> VkResult<vk::ShaderModule>;
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);
    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VkResult<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout>;
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline>;
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // --- descriptors ---
    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo,
    ) -> VkResult<vk::DescriptorPool>;
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);

    // --- command pools / buffers ---
    unsafe fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo)
        -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    // --- recorded commands ---
    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        contents: vk::SubpassContents,
    );
    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]);
    unsafe fn cmd_set_line_width(&self, cmd: vk::CommandBuffer, width: f32);
    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    );

    // --- queues ---
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()>;
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;
}

/// A single device-owned handle released through `release` on drop.
pub(crate) struct Owned<H: Copy + fmt::Debug> {
    device: SharedDevice,
    handle: H,
    release: fn(&dyn GpuDevice, H),
}

impl<H: Copy + fmt::Debug> Owned<H> {
    pub(crate) fn new(device: SharedDevice, handle: H, release: fn(&dyn GpuDevice, H)) -> Self {
        Self {
            device,
            handle,
            release,
        }
    }

    pub(crate) fn get(&self) -> H {
        self.handle
    }
}

impl<H: Copy + fmt::Debug> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

impl<H: Copy + fmt::Debug> Drop for Owned<H> {
    fn drop(&mut self) {
        (self.release)(&*self.device, self.handle);
    }
}

/// [`GpuDevice`] over a live `ash` device.
///
/// The instance, surface and logical device are created and destroyed by the
/// application; this type only borrows their function tables.
pub struct AshDevice {
    device: ash::Device,
    surface_loader: surface::Instance,
    swapchain_loader: swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    queue_family: u32,
    queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl AshDevice {
    /// # Safety
    /// `device` must have been created from `phys` on `instance` with the
    /// swapchain extension enabled and one queue in `queue_family`, and
    /// `surface` must belong to `surface_loader`'s instance.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: ash::Device,
        phys: vk::PhysicalDevice,
        surface_loader: surface::Instance,
        surface: vk::SurfaceKHR,
        queue_family: u32,
    ) -> Self {
        let swapchain_loader = swapchain::Device::new(instance, &device);
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(phys) };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        Self {
            device,
            surface_loader,
            swapchain_loader,
            phys,
            surface,
            queue_family,
            queue,
            memory_properties,
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }
}

impl GpuDevice for AshDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.queue
    }

    fn graphics_queue_family(&self) -> u32 {
        self.queue_family
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
        }
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
        }
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.phys, self.surface)
        }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut u8> {
        unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
                .map(|ptr| ptr.cast::<u8>())
        }
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        unsafe { self.device.create_sampler(info, None) }
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo,
    ) -> VkResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    unsafe fn create_semaphore(&self, info: &vk::SemaphoreCreateInfo) -> VkResult<vk::Semaphore> {
        unsafe { self.device.create_semaphore(info, None) }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    unsafe fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo,
    ) -> VkResult<vk::ShaderModule> {
        unsafe { self.device.create_shader_module(info, None) }
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VkResult<vk::DescriptorSetLayout> {
        unsafe { self.device.create_descriptor_set_layout(info, None) }
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    unsafe fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let created = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        };
        match created {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, err)) => Err(err),
        }
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    unsafe fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo,
    ) -> VkResult<vk::DescriptorPool> {
        unsafe { self.device.create_descriptor_pool(info, None) }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        unsafe { self.device.allocate_descriptor_sets(info) }
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) }
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo,
    ) -> VkResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        unsafe { self.device.begin_command_buffer(cmd, info) }
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) {
        unsafe { self.device.cmd_begin_render_pass(cmd, info, contents) }
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, viewports) }
    }

    unsafe fn cmd_set_line_width(&self, cmd: vk::CommandBuffer, width: f32) {
        unsafe { self.device.cmd_set_line_width(cmd, width) }
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets)
        }
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        }
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[])
        }
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions)
        }
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> VkResult<()> {
        unsafe { self.device.queue_submit(queue, submits, fence) }
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}
