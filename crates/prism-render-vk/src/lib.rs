// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan resource and command-recording core.
//!
//! Components receive a [`SharedDevice`] at construction and own the handles
//! they create; dropping a component releases its handles in dependency order.
pub mod chain;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod entity;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transfer;

pub use chain::{ChainSettings, PresentChain, Rebuild};
pub use commands::CommandRecorder;
pub use descriptors::DescriptorPool;
pub use device::{AshDevice, GpuDevice, SharedDevice};
pub use entity::ResourceEntity;
pub use error::{AllocationError, ErrorKind, GpuError, GpuResult};
pub use memory::{find_memory_type, GpuBuffer, GpuImage, MemoryAllocator};
pub use pipeline::{
    DescriptorBinding, DescriptorKind, DescriptorLayout, GraphicsPipeline, PipelineSettings,
    ShaderSet,
};
pub use render_pass::RenderPass;
pub use swapchain::{SwapchainCoordinator, SwapchainPreferences};
pub use sync::FrameSync;
pub use texture::{Texture, TextureFactory};
pub use transfer::{ImmediateUploader, LayoutTransition, Uploader};
