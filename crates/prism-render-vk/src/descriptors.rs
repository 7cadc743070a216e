// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;
use tracing::debug;

use crate::device::{Owned, SharedDevice};
use crate::error::{GpuError, GpuResult};
use crate::memory::GpuBuffer;
use crate::pipeline::{DescriptorBinding, DescriptorKind, DescriptorLayout};
use crate::texture::Texture;

/// Pool sized for `max_sets` sets of one binding layout. Sets are released
/// together with the pool.
pub struct DescriptorPool {
    pool: Owned<vk::DescriptorPool>,
    device: SharedDevice,
    max_sets: u32,
}

/// One pool entry per descriptor type, counting every binding of that type
/// across `max_sets` sets.
pub fn pool_sizes(bindings: &[DescriptorBinding], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for b in bindings {
        let ty = b.kind.vk_type();
        match sizes.iter_mut().find(|s| s.ty == ty) {
            Some(s) => s.descriptor_count += max_sets,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: max_sets,
            }),
        }
    }
    sizes
}

impl DescriptorPool {
    pub fn for_bindings(
        device: &SharedDevice,
        bindings: &[DescriptorBinding],
        max_sets: u32,
    ) -> GpuResult<Self> {
        let sizes = pool_sizes(bindings, max_sets);
        if sizes.is_empty() || max_sets == 0 {
            return Err(GpuError::InvalidInput(
                "descriptor pool needs at least one binding and one set".into(),
            ));
        }
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.create_descriptor_pool(&ci) }
            .map_err(GpuError::creation("descriptor pool"))?;
        Ok(Self {
            pool: Owned::new(device.clone(), pool, |d, p| unsafe {
                d.destroy_descriptor_pool(p)
            }),
            device: device.clone(),
            max_sets,
        })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool.get()
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn allocate(
        &self,
        layout: &DescriptorLayout,
        count: usize,
    ) -> GpuResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool.get(),
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { self.device.allocate_descriptor_sets(&ai) }
            .map_err(GpuError::creation("descriptor sets"))?;
        debug!(count, "descriptor sets allocated");
        Ok(sets)
    }

    /// Points `slot` of `set` at the whole of `buffer`.
    pub fn write_uniform_buffer(&self, set: vk::DescriptorSet, slot: u32, buffer: &GpuBuffer) {
        let info = vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: 0,
            range: buffer.size(),
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: slot,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: DescriptorKind::UniformBuffer.vk_type(),
            p_buffer_info: &info,
            ..Default::default()
        };
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write)) };
    }

    pub fn write_texture(&self, set: vk::DescriptorSet, slot: u32, texture: &Texture) {
        let info = texture.descriptor_info();
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: slot,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: DescriptorKind::CombinedImageSampler.vk_type(),
            p_image_info: &info,
            ..Default::default()
        };
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write)) };
    }
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("pool", &self.pool)
            .field("max_sets", &self.max_sets)
            .finish_non_exhaustive()
    }
}
