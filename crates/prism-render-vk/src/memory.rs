// SPDX-License-Identifier: CEPL-1.0
//! Device memory: memory-type selection and owned buffer/image allocations.
use std::fmt;

use ash::vk;
use tracing::debug;

use crate::device::SharedDevice;
use crate::error::{AllocationError, GpuError, GpuResult};

/// Picks the lowest memory-type index allowed by `type_filter` whose property
/// flags contain `required`.
///
/// No further ranking is applied: when several types qualify, the device's
/// reported ordering decides.
pub fn find_memory_type(
    table: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, AllocationError> {
    let count = table.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && table.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(AllocationError::NoCompatibleType {
            type_filter,
            properties: required,
        })
}

/// A buffer and the memory bound to it at offset 0.
///
/// Move-only. Dropping it destroys the buffer handle and then frees the
/// memory; the caller must make sure no pending GPU work still uses it.
pub struct GpuBuffer {
    device: SharedDevice,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size requested by the caller.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the bound allocation; never smaller than [`size`](Self::size).
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    /// Property flags of the memory type that was selected.
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub fn is_host_accessible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Copies `bytes` into the buffer at `offset` through a temporary mapping.
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> GpuResult<()> {
        self.check_host_range(offset, bytes.len() as vk::DeviceSize)?;
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, bytes.len() as vk::DeviceSize)
                .map_err(|result| GpuError::Mapping { result })?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Reads the first [`size`](Self::size) bytes back to the host.
    pub fn read(&self) -> GpuResult<Vec<u8>> {
        self.check_host_range(0, self.size)?;
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size)
                .map_err(|result| GpuError::Mapping { result })?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    fn check_host_range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> GpuResult<()> {
        if !self.is_host_accessible() {
            return Err(GpuError::InvalidInput(format!(
                "buffer memory {:?} is not host visible and coherent",
                self.properties
            )));
        }
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(GpuError::InvalidInput(format!(
                "range {offset}+{len} exceeds buffer of {} bytes",
                self.size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("buffer", &self.buffer)
            .field("memory", &self.memory)
            .field("size", &self.size)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer);
            self.device.free_memory(self.memory);
        }
    }
}

/// A 2D, single-mip image and its bound memory. Layout is not tracked here.
pub struct GpuImage {
    device: SharedDevice,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuImage")
            .field("image", &self.image)
            .field("memory", &self.memory)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image);
            self.device.free_memory(self.memory);
        }
    }
}

/// Creates buffers and images with dedicated allocations.
#[derive(Clone)]
pub struct MemoryAllocator {
    device: SharedDevice,
    table: vk::PhysicalDeviceMemoryProperties,
}

impl MemoryAllocator {
    pub fn new(device: SharedDevice) -> Self {
        let table = device.memory_properties();
        Self { device, table }
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn memory_table(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.table
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<GpuBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidInput("buffer size must be non-zero".into()));
        }
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { self.device.create_buffer(&bci) }.map_err(GpuError::creation("buffer"))?;
        let req = unsafe { self.device.buffer_memory_requirements(buffer) };

        let (memory, type_flags) = match self.allocate(req, properties) {
            Ok(found) => found,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer) };
                return Err(err);
            }
        };
        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer);
                self.device.free_memory(memory);
            }
            return Err(GpuError::ResourceCreation {
                what: "buffer memory binding",
                result,
            });
        }

        debug!(size, allocation = req.size, ?usage, ?type_flags, "buffer allocated");
        Ok(GpuBuffer {
            device: self.device.clone(),
            buffer,
            memory,
            size,
            allocation_size: req.size,
            properties: type_flags,
        })
    }

    /// Host-visible, coherent uniform buffer that can be rewritten with [`GpuBuffer::write`].
    pub fn create_uniform_buffer(&self, size: vk::DeviceSize) -> GpuResult<GpuBuffer> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<GpuImage> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidInput("image extent must be non-zero".into()));
        }
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { self.device.create_image(&ici) }.map_err(GpuError::creation("image"))?;
        let req = unsafe { self.device.image_memory_requirements(image) };

        let (memory, _) = match self.allocate(req, properties) {
            Ok(found) => found,
            Err(err) => {
                unsafe { self.device.destroy_image(image) };
                return Err(err);
            }
        };
        if let Err(result) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image);
                self.device.free_memory(memory);
            }
            return Err(GpuError::ResourceCreation {
                what: "image memory binding",
                result,
            });
        }

        debug!(
            width = extent.width,
            height = extent.height,
            ?format,
            allocation = req.size,
            "image allocated"
        );
        Ok(GpuImage {
            device: self.device.clone(),
            image,
            memory,
            extent,
            format,
        })
    }

    fn allocate(
        &self,
        req: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> GpuResult<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
        let index = find_memory_type(&self.table, req.memory_type_bits, properties)?;
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: index,
            ..Default::default()
        };
        let memory = unsafe { self.device.allocate_memory(&mai) }.map_err(|result| {
            AllocationError::Refused {
                size: req.size,
                result,
            }
        })?;
        Ok((memory, self.table.memory_types[index as usize].property_flags))
    }
}
