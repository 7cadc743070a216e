// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;
use tracing::debug;

use crate::device::{Owned, SharedDevice};
use crate::error::{GpuError, GpuResult};

/// Single-subpass render pass with one color attachment that ends up
/// presentable.
pub struct RenderPass {
    handle: Owned<vk::RenderPass>,
    format: vk::Format,
}

impl RenderPass {
    pub fn new(device: &SharedDevice, format: vk::Format) -> GpuResult<Self> {
        let color_att = color_attachment(format);
        let att_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &att_ref,
            ..Default::default()
        };
        let dependency = external_dependency();

        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_att,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let raw = unsafe { device.create_render_pass(&rp_info) }
            .map_err(GpuError::creation("render pass"))?;
        debug!(?format, "render pass created");

        Ok(Self {
            handle: Owned::new(device.clone(), raw, |d, rp| unsafe { d.destroy_render_pass(rp) }),
            format,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle.get()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .finish()
    }
}

/// Cleared on load, stored, transitioned from undefined to present-src.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Orders the attachment write after whatever previously used the image
/// (the presentation engine, usually).
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}
