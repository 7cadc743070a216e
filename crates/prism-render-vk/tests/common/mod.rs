// SPDX-License-Identifier: CEPL-1.0
//! A recording [`GpuDevice`] double.
//!
//! Every entry point appends to a call log. Command buffers keep their own
//! command streams (cleared on begin), device memory is backed by host
//! allocations and recorded copies are replayed on submit, so data written
//! through staging can be read back. Any fallible call can be made to fail.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use prism_render::{MeshAsset, RenderSize, Vertex};
use prism_render_vk::{
    DescriptorBinding, DescriptorKind, DescriptorLayout, GpuDevice, GraphicsPipeline,
    ImmediateUploader, MemoryAllocator, PipelineSettings, RenderPass, ShaderSet, SharedDevice,
    SwapchainCoordinator, SwapchainPreferences,
};

pub const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
pub const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);
pub const ALIGNMENT: u64 = 256;

/// One entry of the call log: the entry point and the primary handle it
/// touched (0 when there is none).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub handle: u64,
}

/// A command as recorded into a command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Cmd {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: (u32, u32),
        clear: [f32; 4],
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport { width: f32, height: f32 },
    SetLineWidth(f32),
    BindVertexBuffers(Vec<vk::Buffer>, Vec<vk::DeviceSize>),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    BindDescriptorSets(vk::PipelineLayout, Vec<vk::DescriptorSet>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        extent: (u32, u32),
    },
    Barrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: (u32, u32),
    pub min_image_count: u32,
    pub surface: vk::SurfaceKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassDesc {
    pub attachment: vk::AttachmentDescription,
    pub color_ref_layout: vk::ImageLayout,
    pub dependency_count: u32,
}

#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub stage_count: u32,
    pub stride: u32,
    pub attribute_formats: Vec<vk::Format>,
    pub topology: vk::PrimitiveTopology,
    pub viewport: (f32, f32),
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub blend_enabled: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
}

#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_modes: [vk::SamplerAddressMode; 3],
    pub anisotropy: bool,
    pub compare: bool,
    pub border_color: vk::BorderColor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub ty: vk::DescriptorType,
}

struct Failure {
    op: &'static str,
    skip: usize,
    result: vk::Result,
}

struct Allocation {
    bytes: Box<[u8]>,
    flags: vk::MemoryPropertyFlags,
}

pub struct MockDevice {
    next_handle: Cell<u64>,
    calls: RefCell<Vec<Call>>,
    live: RefCell<HashMap<u64, &'static str>>,
    failures: RefCell<Vec<Failure>>,

    memory_table: vk::PhysicalDeviceMemoryProperties,
    type_bits: Cell<u32>,
    memory: RefCell<HashMap<u64, Allocation>>,
    buffer_sizes: RefCell<HashMap<vk::Buffer, vk::DeviceSize>>,
    buffer_usage: RefCell<HashMap<vk::Buffer, vk::BufferUsageFlags>>,
    buffer_memory: RefCell<HashMap<vk::Buffer, vk::DeviceMemory>>,
    image_extents: RefCell<HashMap<vk::Image, (u32, u32)>>,
    image_memory: RefCell<HashMap<vk::Image, vk::DeviceMemory>>,
    image_layouts: RefCell<HashMap<vk::Image, vk::ImageLayout>>,

    caps: Cell<vk::SurfaceCapabilitiesKHR>,
    formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    present_modes: RefCell<Vec<vk::PresentModeKHR>>,
    swapchains: RefCell<Vec<SwapchainDesc>>,
    render_passes: RefCell<Vec<RenderPassDesc>>,
    pipelines: RefCell<Vec<PipelineDesc>>,
    samplers: RefCell<Vec<SamplerDesc>>,
    set_layouts: RefCell<Vec<Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)>>>,
    pool_flags: RefCell<Vec<vk::CommandPoolCreateFlags>>,
    descriptor_writes: RefCell<Vec<DescriptorWrite>>,

    streams: RefCell<HashMap<vk::CommandBuffer, Vec<Cmd>>>,
    begin_flags: RefCell<HashMap<vk::CommandBuffer, vk::CommandBufferUsageFlags>>,
    submitted: RefCell<Vec<vk::CommandBuffer>>,
    violations: RefCell<Vec<String>>,
}

impl MockDevice {
    /// Three memory types: device-local, host-visible+coherent, and both.
    pub fn new() -> Rc<Self> {
        Self::with_memory_types(&[DEVICE_LOCAL, HOST, DEVICE_LOCAL | HOST])
    }

    pub fn with_memory_types(flags: &[vk::MemoryPropertyFlags]) -> Rc<Self> {
        let mut table = vk::PhysicalDeviceMemoryProperties::default();
        table.memory_type_count = flags.len() as u32;
        for (slot, &f) in table.memory_types.iter_mut().zip(flags) {
            slot.property_flags = f;
        }
        Rc::new(Self {
            next_handle: Cell::new(0x1000),
            calls: RefCell::default(),
            live: RefCell::default(),
            failures: RefCell::default(),
            memory_table: table,
            type_bits: Cell::new((1u32 << flags.len()) - 1),
            memory: RefCell::default(),
            buffer_sizes: RefCell::default(),
            buffer_usage: RefCell::default(),
            buffer_memory: RefCell::default(),
            image_extents: RefCell::default(),
            image_memory: RefCell::default(),
            image_layouts: RefCell::default(),
            caps: Cell::new(vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            }),
            formats: RefCell::new(vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ]),
            present_modes: RefCell::new(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            swapchains: RefCell::default(),
            render_passes: RefCell::default(),
            pipelines: RefCell::default(),
            samplers: RefCell::default(),
            set_layouts: RefCell::default(),
            pool_flags: RefCell::default(),
            descriptor_writes: RefCell::default(),
            streams: RefCell::default(),
            begin_flags: RefCell::default(),
            submitted: RefCell::default(),
            violations: RefCell::default(),
        })
    }

    pub fn shared(self: &Rc<Self>) -> SharedDevice {
        self.clone()
    }

    // --- configuration ---

    /// The `skip + 1`-th call to `op` fails with `result`.
    pub fn fail_after(&self, op: &'static str, skip: usize, result: vk::Result) {
        self.failures.borrow_mut().push(Failure { op, skip, result });
    }

    pub fn fail_on(&self, op: &'static str, result: vk::Result) {
        self.fail_after(op, 0, result);
    }

    /// Restricts which memory types every resource reports as compatible.
    pub fn set_type_bits(&self, bits: u32) {
        self.type_bits.set(bits);
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        let mut caps = self.caps.get();
        caps.current_extent = vk::Extent2D { width, height };
        self.caps.set(caps);
    }

    pub fn set_image_counts(&self, min: u32, max: u32) {
        let mut caps = self.caps.get();
        caps.min_image_count = min;
        caps.max_image_count = max;
        self.caps.set(caps);
    }

    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        *self.formats.borrow_mut() = formats;
    }

    pub fn set_present_modes(&self, modes: Vec<vk::PresentModeKHR>) {
        *self.present_modes.borrow_mut() = modes;
    }

    pub fn clear_log(&self) {
        self.calls.borrow_mut().clear();
    }

    // --- inspection ---

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(|c| c.op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.op == op).count()
    }

    /// Index of the first logged `op` touching `handle`.
    pub fn position(&self, op: &str, handle: impl Handle) -> Option<usize> {
        let raw = handle.as_raw();
        self.calls
            .borrow()
            .iter()
            .position(|c| c.op == op && c.handle == raw)
    }

    pub fn first(&self, op: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.op == op)
    }

    pub fn last(&self, op: &str) -> Option<usize> {
        self.calls.borrow().iter().rposition(|c| c.op == op)
    }

    /// Handles created and not yet destroyed, by kind.
    pub fn live(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.live.borrow().values().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, handle: impl Handle) -> bool {
        self.live.borrow().contains_key(&handle.as_raw())
    }

    pub fn stream(&self, cmd: vk::CommandBuffer) -> Vec<Cmd> {
        self.streams.borrow().get(&cmd).cloned().unwrap_or_default()
    }

    pub fn begin_flags(&self, cmd: vk::CommandBuffer) -> Option<vk::CommandBufferUsageFlags> {
        self.begin_flags.borrow().get(&cmd).copied()
    }

    pub fn submitted(&self) -> Vec<vk::CommandBuffer> {
        self.submitted.borrow().clone()
    }

    pub fn memory_bytes(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.memory
            .borrow()
            .get(&memory.as_raw())
            .map(|a| a.bytes.to_vec())
            .unwrap_or_default()
    }

    pub fn buffer_usage(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.buffer_usage.borrow().get(&buffer).copied()
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.image_layouts.borrow().get(&image).copied()
    }

    pub fn swapchains(&self) -> Vec<SwapchainDesc> {
        self.swapchains.borrow().clone()
    }

    pub fn render_passes(&self) -> Vec<RenderPassDesc> {
        self.render_passes.borrow().clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineDesc> {
        self.pipelines.borrow().clone()
    }

    pub fn samplers(&self) -> Vec<SamplerDesc> {
        self.samplers.borrow().clone()
    }

    pub fn set_layouts(&self) -> Vec<Vec<(u32, vk::DescriptorType, vk::ShaderStageFlags)>> {
        self.set_layouts.borrow().clone()
    }

    pub fn pool_flags(&self) -> Vec<vk::CommandPoolCreateFlags> {
        self.pool_flags.borrow().clone()
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.descriptor_writes.borrow().clone()
    }

    /// Layout or ordering mistakes observed while replaying submissions.
    pub fn violations(&self) -> Vec<String> {
        self.violations.borrow().clone()
    }

    // --- internals ---

    fn log(&self, op: &'static str, handle: u64) {
        self.calls.borrow_mut().push(Call { op, handle });
    }

    fn check(&self, op: &'static str) -> VkResult<()> {
        let mut failures = self.failures.borrow_mut();
        if let Some(i) = failures.iter().position(|f| f.op == op) {
            if failures[i].skip == 0 {
                let f = failures.remove(i);
                self.log(op, 0);
                return Err(f.result);
            }
            failures[i].skip -= 1;
        }
        Ok(())
    }

    fn create<H: Handle>(&self, op: &'static str, kind: &'static str) -> VkResult<H> {
        self.check(op)?;
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw, kind);
        self.log(op, raw);
        Ok(H::from_raw(raw))
    }

    fn destroy(&self, op: &'static str, handle: impl Handle) {
        let raw = handle.as_raw();
        if self.live.borrow_mut().remove(&raw).is_none() {
            self.violations
                .borrow_mut()
                .push(format!("{op} on dead or unknown handle {raw:#x}"));
        }
        self.log(op, raw);
    }

    fn push(&self, cmd: vk::CommandBuffer, command: Cmd) {
        self.streams.borrow_mut().entry(cmd).or_default().push(command);
    }

    fn requirements(&self, size: vk::DeviceSize) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: size.div_ceil(ALIGNMENT) * ALIGNMENT,
            alignment: ALIGNMENT,
            memory_type_bits: self.type_bits.get(),
        }
    }

    fn replay(&self, cmd: vk::CommandBuffer) {
        for command in self.stream(cmd) {
            match command {
                Cmd::CopyBuffer { src, dst, size } => {
                    let src_mem = self.buffer_memory.borrow().get(&src).copied();
                    let dst_mem = self.buffer_memory.borrow().get(&dst).copied();
                    match (src_mem, dst_mem) {
                        (Some(s), Some(d)) => self.copy_memory(s, d, size as usize),
                        _ => self
                            .violations
                            .borrow_mut()
                            .push("copy between unbound buffers".into()),
                    }
                }
                Cmd::CopyBufferToImage {
                    src,
                    dst,
                    layout,
                    extent,
                } => {
                    let current = self.image_layout(dst);
                    if layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL || current != Some(layout) {
                        self.violations
                            .borrow_mut()
                            .push(format!("image copy while image is in {current:?}"));
                    }
                    let src_mem = self.buffer_memory.borrow().get(&src).copied();
                    let dst_mem = self.image_memory.borrow().get(&dst).copied();
                    if let (Some(s), Some(d)) = (src_mem, dst_mem) {
                        self.copy_memory(s, d, (extent.0 * extent.1 * 4) as usize);
                    }
                }
                Cmd::Barrier { image, old, new, .. } => {
                    let current = self.image_layout(image).unwrap_or(vk::ImageLayout::UNDEFINED);
                    if old != vk::ImageLayout::UNDEFINED && old != current {
                        self.violations
                            .borrow_mut()
                            .push(format!("barrier from {old:?} but image is in {current:?}"));
                    }
                    self.image_layouts.borrow_mut().insert(image, new);
                }
                _ => {}
            }
        }
    }

    fn copy_memory(&self, src: vk::DeviceMemory, dst: vk::DeviceMemory, len: usize) {
        let mut memory = self.memory.borrow_mut();
        let bytes = memory
            .get(&src.as_raw())
            .map(|a| a.bytes[..len].to_vec())
            .unwrap_or_default();
        if let Some(d) = memory.get_mut(&dst.as_raw()) {
            d.bytes[..bytes.len()].copy_from_slice(&bytes);
        }
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

impl GpuDevice for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_table
    }

    fn graphics_queue(&self) -> vk::Queue {
        vk::Queue::from_raw(0x9)
    }

    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0x5)
    }

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.check("surface_capabilities")?;
        Ok(self.caps.get())
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.check("surface_formats")?;
        Ok(self.formats.borrow().clone())
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.check("surface_present_modes")?;
        Ok(self.present_modes.borrow().clone())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR,
    ) -> VkResult<vk::SwapchainKHR> {
        let swapchain = self.create("create_swapchain", "swapchain")?;
        self.swapchains.borrow_mut().push(SwapchainDesc {
            format: info.image_format,
            color_space: info.image_color_space,
            present_mode: info.present_mode,
            extent: (info.image_extent.width, info.image_extent.height),
            min_image_count: info.min_image_count,
            surface: info.surface,
        });
        Ok(swapchain)
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.check("swapchain_images")?;
        self.log("swapchain_images", swapchain.as_raw());
        let count = self
            .swapchains
            .borrow()
            .last()
            .map_or(0, |s| s.min_image_count);
        Ok((0..count)
            .map(|_| {
                let raw = self.next_handle.get();
                self.next_handle.set(raw + 1);
                vk::Image::from_raw(raw)
            })
            .collect())
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy("destroy_swapchain", swapchain);
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        let memory: vk::DeviceMemory = self.create("allocate_memory", "memory")?;
        let flags = self.memory_table.memory_types[info.memory_type_index as usize].property_flags;
        self.memory.borrow_mut().insert(
            memory.as_raw(),
            Allocation {
                bytes: vec![0u8; info.allocation_size as usize].into_boxed_slice(),
                flags,
            },
        );
        Ok(memory)
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        self.destroy("free_memory", memory);
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut u8> {
        self.check("map_memory")?;
        self.log("map_memory", memory.as_raw());
        let mut store = self.memory.borrow_mut();
        let alloc = store
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        if !alloc.flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
            || (offset + size) as usize > alloc.bytes.len()
        {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        Ok(unsafe { alloc.bytes.as_mut_ptr().add(offset as usize) })
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.log("unmap_memory", memory.as_raw());
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let buffer = self.create("create_buffer", "buffer")?;
        self.buffer_sizes.borrow_mut().insert(buffer, info.size);
        self.buffer_usage.borrow_mut().insert(buffer, info.usage);
        Ok(buffer)
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy("destroy_buffer", buffer);
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.buffer_sizes.borrow().get(&buffer).copied().unwrap_or(0);
        self.requirements(size)
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.check("bind_buffer_memory")?;
        assert_eq!(offset, 0);
        self.log("bind_buffer_memory", buffer.as_raw());
        self.buffer_memory.borrow_mut().insert(buffer, memory);
        Ok(())
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        let image = self.create("create_image", "image")?;
        self.image_extents
            .borrow_mut()
            .insert(image, (info.extent.width, info.extent.height));
        self.image_layouts.borrow_mut().insert(image, info.initial_layout);
        Ok(image)
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        self.destroy("destroy_image", image);
    }

    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let (w, h) = self.image_extents.borrow().get(&image).copied().unwrap_or((0, 0));
        self.requirements(u64::from(w) * u64::from(h) * 4)
    }

    unsafe fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.check("bind_image_memory")?;
        assert_eq!(offset, 0);
        self.log("bind_image_memory", image.as_raw());
        self.image_memory.borrow_mut().insert(image, memory);
        Ok(())
    }

    unsafe fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        self.create("create_image_view", "image_view")
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("destroy_image_view", view);
    }

    unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        let sampler = self.create("create_sampler", "sampler")?;
        self.samplers.borrow_mut().push(SamplerDesc {
            mag_filter: info.mag_filter,
            min_filter: info.min_filter,
            mipmap_mode: info.mipmap_mode,
            address_modes: [info.address_mode_u, info.address_mode_v, info.address_mode_w],
            anisotropy: info.anisotropy_enable == vk::TRUE,
            compare: info.compare_enable == vk::TRUE,
            border_color: info.border_color,
        });
        Ok(sampler)
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy("destroy_sampler", sampler);
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo,
    ) -> VkResult<vk::RenderPass> {
        let render_pass = self.create("create_render_pass", "render_pass")?;
        let attachments = unsafe { slice(info.p_attachments, info.attachment_count) };
        let subpasses = unsafe { slice(info.p_subpasses, info.subpass_count) };
        let color_ref_layout = subpasses
            .first()
            .and_then(|s| unsafe { slice(s.p_color_attachments, s.color_attachment_count) }.first())
            .map_or(vk::ImageLayout::UNDEFINED, |r| r.layout);
        self.render_passes.borrow_mut().push(RenderPassDesc {
            attachment: attachments.first().copied().unwrap_or_default(),
            color_ref_layout,
            dependency_count: info.dependency_count,
        });
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("destroy_render_pass", render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer> {
        self.create("create_framebuffer", "framebuffer")
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("destroy_framebuffer", framebuffer);
    }

    unsafe fn create_semaphore(&self, _info: &vk::SemaphoreCreateInfo) -> VkResult<vk::Semaphore> {
        self.create("create_semaphore", "semaphore")
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("destroy_semaphore", semaphore);
    }

    unsafe fn create_shader_module(
        &self,
        _info: &vk::ShaderModuleCreateInfo,
    ) -> VkResult<vk::ShaderModule> {
        self.create("create_shader_module", "shader_module")
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("destroy_shader_module", module);
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let layout = self.create("create_descriptor_set_layout", "descriptor_set_layout")?;
        let bindings = unsafe { slice(info.p_bindings, info.binding_count) }
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.stage_flags))
            .collect();
        self.set_layouts.borrow_mut().push(bindings);
        Ok(layout)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy("destroy_descriptor_set_layout", layout);
    }

    unsafe fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        self.create("create_pipeline_layout", "pipeline_layout")
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("destroy_pipeline_layout", layout);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let pipeline = self.create("create_graphics_pipeline", "pipeline")?;
        let desc = unsafe {
            let vi = &*info.p_vertex_input_state;
            let ia = &*info.p_input_assembly_state;
            let vp = &*info.p_viewport_state;
            let rs = &*info.p_rasterization_state;
            let ds = &*info.p_depth_stencil_state;
            let cb = &*info.p_color_blend_state;
            let dy = &*info.p_dynamic_state;
            let viewport = slice(vp.p_viewports, vp.viewport_count)
                .first()
                .map_or((0.0, 0.0), |v| (v.width, v.height));
            PipelineDesc {
                render_pass: info.render_pass,
                layout: info.layout,
                stage_count: info.stage_count,
                stride: slice(
                    vi.p_vertex_binding_descriptions,
                    vi.vertex_binding_description_count,
                )
                .first()
                .map_or(0, |b| b.stride),
                attribute_formats: slice(
                    vi.p_vertex_attribute_descriptions,
                    vi.vertex_attribute_description_count,
                )
                .iter()
                .map(|a| a.format)
                .collect(),
                topology: ia.topology,
                viewport,
                cull_mode: rs.cull_mode,
                front_face: rs.front_face,
                depth_test: ds.depth_test_enable == vk::TRUE,
                blend_enabled: slice(cb.p_attachments, cb.attachment_count)
                    .iter()
                    .any(|a| a.blend_enable == vk::TRUE),
                dynamic_states: slice(dy.p_dynamic_states, dy.dynamic_state_count).to_vec(),
            }
        };
        self.pipelines.borrow_mut().push(desc);
        Ok(pipeline)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("destroy_pipeline", pipeline);
    }

    unsafe fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo,
    ) -> VkResult<vk::DescriptorPool> {
        self.create("create_descriptor_pool", "descriptor_pool")
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy("destroy_descriptor_pool", pool);
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        self.check("allocate_descriptor_sets")?;
        self.log("allocate_descriptor_sets", info.descriptor_pool.as_raw());
        Ok((0..info.descriptor_set_count)
            .map(|_| {
                let raw = self.next_handle.get();
                self.next_handle.set(raw + 1);
                vk::DescriptorSet::from_raw(raw)
            })
            .collect())
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.log("update_descriptor_sets", 0);
        self.descriptor_writes
            .borrow_mut()
            .extend(writes.iter().map(|w| DescriptorWrite {
                set: w.dst_set,
                binding: w.dst_binding,
                ty: w.descriptor_type,
            }));
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo,
    ) -> VkResult<vk::CommandPool> {
        let pool = self.create("create_command_pool", "command_pool")?;
        self.pool_flags.borrow_mut().push(info.flags);
        Ok(pool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy("destroy_command_pool", pool);
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        let mut out = Vec::with_capacity(info.command_buffer_count as usize);
        for _ in 0..info.command_buffer_count {
            out.push(self.create("allocate_command_buffer", "command_buffer")?);
        }
        Ok(out)
    }

    unsafe fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &cmd in buffers {
            // the stream is kept so tests can inspect freed transfer buffers
            self.destroy("free_command_buffer", cmd);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo,
    ) -> VkResult<()> {
        self.check("begin_command_buffer")?;
        self.log("begin_command_buffer", cmd.as_raw());
        self.streams.borrow_mut().insert(cmd, Vec::new());
        self.begin_flags.borrow_mut().insert(cmd, info.flags);
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.check("end_command_buffer")?;
        self.log("end_command_buffer", cmd.as_raw());
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        _contents: vk::SubpassContents,
    ) {
        let clear = unsafe { slice(info.p_clear_values, info.clear_value_count) }
            .first()
            .map_or([0.0; 4], |c| unsafe { c.color.float32 });
        self.push(
            cmd,
            Cmd::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: (info.render_area.extent.width, info.render_area.extent.height),
                clear,
            },
        );
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.push(cmd, Cmd::EndRenderPass);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.push(cmd, Cmd::BindPipeline(pipeline));
    }

    unsafe fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        for v in viewports {
            self.push(
                cmd,
                Cmd::SetViewport {
                    width: v.width,
                    height: v.height,
                },
            );
        }
    }

    unsafe fn cmd_set_line_width(&self, cmd: vk::CommandBuffer, width: f32) {
        self.push(cmd, Cmd::SetLineWidth(width));
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.push(cmd, Cmd::BindVertexBuffers(buffers.to_vec(), offsets.to_vec()));
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.push(cmd, Cmd::BindIndexBuffer(buffer, index_type));
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        _first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.push(cmd, Cmd::BindDescriptorSets(layout, sets.to_vec()));
    }

    unsafe fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.push(
            cmd,
            Cmd::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    unsafe fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.push(
            cmd,
            Cmd::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        for r in regions {
            assert_eq!((r.src_offset, r.dst_offset), (0, 0));
            self.push(cmd, Cmd::CopyBuffer { src, dst, size: r.size });
        }
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        for r in regions {
            self.push(
                cmd,
                Cmd::CopyBufferToImage {
                    src,
                    dst,
                    layout: dst_layout,
                    extent: (r.image_extent.width, r.image_extent.height),
                },
            );
        }
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        for b in image_barriers {
            self.push(
                cmd,
                Cmd::Barrier {
                    image: b.image,
                    old: b.old_layout,
                    new: b.new_layout,
                    src_stage,
                    dst_stage,
                },
            );
        }
    }

    unsafe fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo],
        _fence: vk::Fence,
    ) -> VkResult<()> {
        self.check("queue_submit")?;
        for si in submits {
            for &cmd in unsafe { slice(si.p_command_buffers, si.command_buffer_count) } {
                self.log("queue_submit", cmd.as_raw());
                self.submitted.borrow_mut().push(cmd);
                self.replay(cmd);
            }
        }
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.check("queue_wait_idle")?;
        self.log("queue_wait_idle", 0);
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.check("device_wait_idle")?;
        self.log("device_wait_idle", 0);
        Ok(())
    }
}

// --- fixtures ---

pub fn uploader(mock: &Rc<MockDevice>) -> ImmediateUploader {
    ImmediateUploader::new(MemoryAllocator::new(mock.shared())).expect("uploader")
}

/// Placeholder SPIR-V: the double never looks inside the modules.
pub fn shaders() -> ShaderSet {
    ShaderSet::new(vec![0x0723_0203, 0x0001_0000], vec![0x0723_0203, 0x0001_0000])
}

pub fn bindings() -> Vec<DescriptorBinding> {
    vec![
        DescriptorBinding::new(0, DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
        DescriptorBinding::new(
            1,
            DescriptorKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

pub fn triangle() -> MeshAsset {
    MeshAsset::non_indexed(vec![
        Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0], [0.5, 0.0]),
        Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    ])
    .expect("triangle")
}

pub fn quad() -> MeshAsset {
    MeshAsset::new(
        vec![
            Vertex::new([-0.5, -0.5, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0]),
            Vertex::new([0.5, -0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
    .expect("quad")
}

/// Swapchain-dependent targets built by hand, the way a chain would.
pub struct Targets {
    pub pipeline: GraphicsPipeline,
    pub layout: DescriptorLayout,
    pub render_pass: RenderPass,
    pub swapchain: SwapchainCoordinator,
}

pub fn targets(mock: &Rc<MockDevice>) -> Targets {
    let dev = mock.shared();
    let mut swapchain =
        SwapchainCoordinator::new(&dev, RenderSize::new(800, 600), &SwapchainPreferences::default())
            .expect("swapchain");
    let render_pass = RenderPass::new(&dev, swapchain.format()).expect("render pass");
    swapchain.create_framebuffers(&render_pass).expect("framebuffers");
    let layout = DescriptorLayout::new(&dev, &bindings()).expect("descriptor layout");
    let pipeline = GraphicsPipeline::build(
        &dev,
        &render_pass,
        swapchain.extent(),
        &shaders(),
        &layout,
        &PipelineSettings::default(),
    )
    .expect("pipeline");
    Targets {
        pipeline,
        layout,
        render_pass,
        swapchain,
    }
}
