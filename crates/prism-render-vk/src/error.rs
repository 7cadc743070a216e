// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

pub type GpuResult<T> = Result<T, GpuError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no memory type in filter {type_filter:#b} supports {properties:?}")]
    NoCompatibleType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("device refused an allocation of {size} bytes: {result}")]
    Refused { size: vk::DeviceSize, result: vk::Result },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },
    #[error("failed to {stage} command buffer: {result}")]
    Recording {
        stage: &'static str,
        result: vk::Result,
    },
    #[error("queue submission failed: {result}")]
    Submission { result: vk::Result },
    #[error("failed to map device memory: {result}")]
    Mapping { result: vk::Result },
    #[error("unsupported image layout transition {from:?} -> {to:?}")]
    LayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// The three failure classes callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Allocation,
    ResourceCreation,
    Recording,
}

impl GpuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpuError::Allocation(_) | GpuError::Mapping { .. } => ErrorKind::Allocation,
            GpuError::Recording { .. } | GpuError::Submission { .. } => ErrorKind::Recording,
            GpuError::ResourceCreation { .. }
            | GpuError::LayoutTransition { .. }
            | GpuError::InvalidInput(_) => ErrorKind::ResourceCreation,
        }
    }

    pub(crate) fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::ResourceCreation { what, result }
    }

    pub(crate) fn recording(stage: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Recording { stage, result }
    }
}
