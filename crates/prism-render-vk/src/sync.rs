// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::device::{Owned, SharedDevice};
use crate::error::{GpuError, GpuResult};

/// The semaphore pair for one acquire → submit → present round.
///
/// Only safe to drop once the device no longer waits on or signals either.
pub struct FrameSync {
    image_available: Owned<vk::Semaphore>,
    render_finished: Owned<vk::Semaphore>,
}

impl FrameSync {
    pub fn new(device: &SharedDevice) -> GpuResult<Self> {
        let image_available = semaphore(device)?;
        let render_finished = semaphore(device)?;
        debug!("frame semaphores created");
        Ok(Self {
            image_available,
            render_finished,
        })
    }

    /// Signalled by acquire, waited on by the submit.
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.get()
    }

    /// Signalled by the submit, waited on by present.
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.get()
    }
}

fn semaphore(device: &SharedDevice) -> GpuResult<Owned<vk::Semaphore>> {
    let ci = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    let raw = unsafe { device.create_semaphore(&ci) }.map_err(GpuError::creation("semaphore"))?;
    Ok(Owned::new(device.clone(), raw, |d, s| unsafe { d.destroy_semaphore(s) }))
}
