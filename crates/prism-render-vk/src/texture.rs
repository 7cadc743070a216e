// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;
use prism_render::ImageAsset;
use tracing::debug;

use crate::device::Owned;
use crate::error::{GpuError, GpuResult};
use crate::memory::GpuImage;
use crate::transfer::{color_subresource_range, Uploader};

/// Pixel format every texture is created with (tightly packed RGBA8).
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// A sampled 2D image: image + memory, view and sampler.
///
/// Fields drop in declaration order, which is the required teardown order:
/// sampler, view, image, image memory.
pub struct Texture {
    sampler: Owned<vk::Sampler>,
    view: Owned<vk::ImageView>,
    image: GpuImage,
}

impl Texture {
    pub fn image(&self) -> &GpuImage {
        &self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.get()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.get()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Descriptor payload for a combined image sampler binding.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler(),
            image_view: self.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("view", &self.view)
            .field("sampler", &self.sampler)
            .finish()
    }
}

/// Builds [`Texture`]s through an [`Uploader`].
pub struct TextureFactory<'a> {
    uploader: &'a dyn Uploader,
}

impl<'a> TextureFactory<'a> {
    pub fn new(uploader: &'a dyn Uploader) -> Self {
        Self { uploader }
    }

    pub fn from_asset(&self, asset: &ImageAsset) -> GpuResult<Texture> {
        self.create_texture(asset.width(), asset.height(), asset.pixels())
    }

    /// Uploads `pixels` (RGBA8, row-major) into a new sampled texture.
    ///
    /// Anything created before a failing step is released before the error
    /// is returned.
    pub fn create_texture(&self, width: u32, height: u32, pixels: &[u8]) -> GpuResult<Texture> {
        let expected = width as usize * height as usize * ImageAsset::BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(GpuError::InvalidInput(format!(
                "{width}x{height} texture needs {expected} bytes, got {}",
                pixels.len()
            )));
        }

        let allocator = self.uploader.allocator();
        let device = allocator.device();
        let image = allocator.create_image(
            vk::Extent2D { width, height },
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.uploader.upload_image(pixels, &image)?;

        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.handle(),
            view_type: vk::ImageViewType::TYPE_2D,
            format: TEXTURE_FORMAT,
            subresource_range: color_subresource_range(),
            ..Default::default()
        };
        let view = unsafe { device.create_image_view(&iv_info) }
            .map_err(GpuError::creation("texture image view"))?;
        let view = Owned::new(device.clone(), view, |d, v| unsafe { d.destroy_image_view(v) });

        let sampler = unsafe { device.create_sampler(&sampler_info()) }
            .map_err(GpuError::creation("texture sampler"))?;
        let sampler = Owned::new(device.clone(), sampler, |d, s| unsafe { d.destroy_sampler(s) });

        debug!(width, height, "texture created");
        Ok(Texture {
            sampler,
            view,
            image,
        })
    }
}

/// Fixed policy: linear filtering, repeat addressing, no anisotropy, single mip.
pub fn sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        mip_lod_bias: 0.0,
        anisotropy_enable: vk::FALSE,
        max_anisotropy: 1.0,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: 0.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    }
}
