// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::rc::Rc;

use ash::vk;
use prism_render::MeshAsset;
use tracing::debug;

use crate::error::{GpuError, GpuResult};
use crate::memory::GpuBuffer;
use crate::texture::Texture;
use crate::transfer::Uploader;

/// Something drawable: geometry resident on the device, plus what the
/// shaders need to shade it.
///
/// Fields drop in declaration order: vertex buffer, index buffer, texture
/// reference. The texture is only freed when this was its last holder.
pub struct ResourceEntity {
    vertex: GpuBuffer,
    index: Option<GpuBuffer>,
    texture: Option<Rc<Texture>>,
    vertex_count: u32,
    index_count: u32,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl ResourceEntity {
    /// Uploads the mesh through `uploader`. An index buffer is only created
    /// when the mesh has indices.
    pub fn from_mesh(uploader: &dyn Uploader, mesh: &MeshAsset) -> GpuResult<Self> {
        if mesh.vertices.is_empty() {
            return Err(GpuError::InvalidInput("mesh has no vertices".into()));
        }
        let vertex_count = u32::try_from(mesh.vertices.len())
            .map_err(|_| GpuError::InvalidInput("too many vertices".into()))?;
        let index_count = u32::try_from(mesh.indices.len())
            .map_err(|_| GpuError::InvalidInput("too many indices".into()))?;

        let vertex = uploader.upload_buffer(mesh.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index = if index_count > 0 {
            Some(uploader.upload_buffer(mesh.index_bytes(), vk::BufferUsageFlags::INDEX_BUFFER)?)
        } else {
            None
        };

        debug!(vertex_count, index_count, "entity uploaded");
        Ok(Self {
            vertex,
            index,
            texture: None,
            vertex_count,
            index_count,
            descriptor_sets: Vec::new(),
        })
    }

    pub fn with_texture(mut self, texture: Rc<Texture>) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Sets bound (starting at set 0) before this entity is drawn.
    pub fn with_descriptor_sets(mut self, sets: Vec<vk::DescriptorSet>) -> Self {
        self.descriptor_sets = sets;
        self
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex
    }

    pub fn index_buffer(&self) -> Option<&GpuBuffer> {
        self.index.as_ref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn texture(&self) -> Option<&Rc<Texture>> {
        self.texture.as_ref()
    }

    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    /// Releases everything now. Command buffers that still reference this
    /// entity must not be submitted afterwards.
    pub fn destroy(self) {
        drop(self);
    }
}

impl fmt::Debug for ResourceEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEntity")
            .field("vertex", &self.vertex)
            .field("index", &self.index)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .field("textured", &self.texture.is_some())
            .field("descriptor_sets", &self.descriptor_sets)
            .finish()
    }
}
