// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation plus the per-image views and framebuffers.
use std::fmt;

use ash::vk;
use prism_render::RenderSize;
use tracing::info;

use crate::device::{Owned, SharedDevice};
use crate::error::{GpuError, GpuResult};
use crate::render_pass::RenderPass;
use crate::transfer::color_subresource_range;

/// What the caller would like; negotiation falls back when the surface
/// does not offer it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// Exact format + color space match, otherwise whatever the surface lists first.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> GpuResult<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| available.first().copied())
        .ok_or_else(|| GpuError::InvalidInput("surface reports no formats".into()))
}

/// FIFO is the one mode every surface must support.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means "no maximum").
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

/// Queries the surface and resolves the extent a swapchain would get for `want`.
pub fn negotiate_extent(device: &SharedDevice, want: RenderSize) -> GpuResult<vk::Extent2D> {
    let caps = unsafe { device.surface_capabilities() }
        .map_err(GpuError::creation("surface capabilities query"))?;
    Ok(choose_extent(&caps, want))
}

fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// The swapchain, one view per image and (once a render pass exists) one
/// framebuffer per view.
///
/// Fields are declared in teardown order: framebuffers, image views,
/// swapchain handle.
pub struct SwapchainCoordinator {
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    views: Vec<Owned<vk::ImageView>>,
    swapchain: Owned<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    device: SharedDevice,
}

impl SwapchainCoordinator {
    pub fn new(
        device: &SharedDevice,
        want: RenderSize,
        prefs: &SwapchainPreferences,
    ) -> GpuResult<Self> {
        let (caps, formats, modes) = unsafe {
            let caps = device
                .surface_capabilities()
                .map_err(GpuError::creation("surface capabilities query"))?;
            let formats = device
                .surface_formats()
                .map_err(GpuError::creation("surface format query"))?;
            let modes = device
                .surface_present_modes()
                .map_err(GpuError::creation("present mode query"))?;
            (caps, formats, modes)
        };

        let surface_format = choose_surface_format(&formats, prefs.surface_format)?;
        let present_mode = choose_present_mode(&modes, prefs.present_mode);
        let extent = choose_extent(&caps, want);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidInput(
                "cannot create a swapchain with a zero-area extent".into(),
            ));
        }
        let min_count = image_count(&caps);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: device.surface(),
            min_image_count: min_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        let raw = unsafe { device.create_swapchain(&swap_info) }
            .map_err(GpuError::creation("swapchain"))?;
        let swapchain = Owned::new(device.clone(), raw, |d, s| unsafe { d.destroy_swapchain(s) });

        let images = unsafe { device.swapchain_images(swapchain.get()) }
            .map_err(GpuError::creation("swapchain image list"))?;

        let mut views = Vec::with_capacity(images.len());
        for &img in &images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: img,
                view_type: vk::ImageViewType::TYPE_2D,
                format: surface_format.format,
                subresource_range: color_subresource_range(),
                ..Default::default()
            };
            let view = unsafe { device.create_image_view(&iv_info) }
                .map_err(GpuError::creation("swapchain image view"))?;
            views.push(Owned::new(device.clone(), view, |d, v| unsafe {
                d.destroy_image_view(v)
            }));
        }

        info!(
            "swapchain ready: {}x{}, format {:?} / {:?}, present_mode {}, images {} (min {})",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode_name(present_mode),
            images.len(),
            min_count,
        );

        Ok(Self {
            framebuffers: Vec::new(),
            views,
            swapchain,
            images,
            surface_format,
            present_mode,
            extent,
            device: device.clone(),
        })
    }

    /// One framebuffer per image view, all targeting `render_pass`.
    /// Any previous set is destroyed first.
    pub fn create_framebuffers(&mut self, render_pass: &RenderPass) -> GpuResult<()> {
        self.destroy_framebuffers();
        let mut framebuffers = Vec::with_capacity(self.views.len());
        for view in &self.views {
            let attachment = view.get();
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: render_pass.handle(),
                attachment_count: 1,
                p_attachments: &attachment,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { self.device.create_framebuffer(&fb_info) }
                .map_err(GpuError::creation("framebuffer"))?;
            framebuffers.push(Owned::new(self.device.clone(), fb, |d, f| unsafe {
                d.destroy_framebuffer(f)
            }));
        }
        self.framebuffers = framebuffers;
        Ok(())
    }

    pub fn destroy_framebuffers(&mut self) {
        self.framebuffers.clear();
    }

    pub fn framebuffers(&self) -> Vec<vk::Framebuffer> {
        self.framebuffers.iter().map(Owned::get).collect()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.views.iter().map(Owned::get).collect()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.get()
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl fmt::Debug for SwapchainCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapchainCoordinator")
            .field("swapchain", &self.swapchain)
            .field("images", &self.images.len())
            .field("framebuffers", &self.framebuffers.len())
            .field("format", &self.surface_format.format)
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}
