// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and logical device for one window.
use std::ffi::CStr;
use std::os::raw::c_char;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render_vk::AshDevice;
use tracing::{debug, info, warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

// STRICT TEARDOWN ORDER:
// - everything created through `device` is dropped by its owners first
// - device, then surface, then instance
pub struct Gpu {
    device: Rc<AshDevice>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    instance: Instance,
    _entry: Entry,
}

impl Gpu {
    pub fn new(window: &Window) -> Result<Self> {
        let display = window
            .display_handle()
            .context("display handle")?
            .as_raw();
        let handle = window.window_handle().context("window handle")?.as_raw();

        unsafe {
            let entry = Entry::load().context("load the Vulkan loader")?;
            let instance = create_instance(&entry, display).context("create_instance")?;

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, display, handle, None)
            {
                Ok(s) => s,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(anyhow!("ash_window::create_surface: {e}"));
                }
            };

            let picked = pick_device_and_queue(&instance, &surface_loader, surface)
                .and_then(|(phys, family)| {
                    let device = create_device(&instance, phys, family)?;
                    Ok((phys, family, device))
                });
            let (phys, family, device) = match picked {
                Ok(p) => p,
                Err(e) => {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };

            let device = AshDevice::new(
                &instance,
                device,
                phys,
                surface_loader.clone(),
                surface,
                family,
            );
            Ok(Self {
                device: Rc::new(device),
                surface_loader,
                surface,
                instance,
                _entry: entry,
            })
        }
    }

    pub fn device(&self) -> &Rc<AshDevice> {
        &self.device
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if Rc::strong_count(&self.device) > 1 {
            warn!("device still referenced at shutdown; resources will leak");
        }
        unsafe {
            let d = self.device.raw();
            d.device_wait_idle().ok();
            d.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("vulkan instance destroyed");
    }
}

unsafe fn create_instance(entry: &Entry, display: RawDisplayHandle) -> Result<Instance> {
    let name = c"prism";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: name.as_ptr(),
        application_version: 0,
        p_engine_name: name.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;

    // validation only in debug builds, and only when installed
    let mut layers: Vec<*const c_char> = Vec::new();
    if cfg!(debug_assertions) {
        let available = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let found = available
            .iter()
            .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            debug!("validation layer not installed");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }?;
    info!(validation = !layers.is_empty(), "vulkan instance created");
    Ok(instance)
}

/// First device with a queue family that does graphics and can present.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in unsafe { instance.enumerate_physical_devices() }? {
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in families.iter().enumerate() {
            let presents = unsafe {
                surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents {
                let props = unsafe { instance.get_physical_device_properties(phys) };
                let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
                info!(device = ?name, queue_family = i, "physical device selected");
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let priority = 1.0f32;
    let queue_info = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: &priority,
        ..Default::default()
    };
    let extensions = [swapchain::NAME.as_ptr()];
    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &queue_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let device = unsafe { instance.create_device(phys, &info, None) }.context("create_device")?;
    Ok(device)
}
