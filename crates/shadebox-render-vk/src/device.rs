// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, device, queue and command pool.
use crate::error::{FatalDeviceError, VkResultExt};
use anyhow::{anyhow, Context, Result};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const MAX_ANISOTROPY: f32 = 16.0;

pub struct DeviceContext {
    // Must outlive `instance`: it owns the loader library.
    _entry: Entry,
    pub instance: Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub cmd_pool: vk::CommandPool,
    /// `Some` when the device exposes anisotropic filtering.
    pub max_anisotropy: Option<f32>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    use vk::DebugUtilsMessageSeverityFlagsEXT as Sev;
    if severity.contains(Sev::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(Sev::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(Sev::INFO) {
        info!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn has_name(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<(Instance, bool)> {
    let app = c"shadebox";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .context("enumerate_instance_extension_properties")?;
    let mut exts: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let mut flags = vk::InstanceCreateFlags::empty();
    if has_name(&available, ash::khr::portability_enumeration::NAME) {
        exts.push(ash::khr::portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        if has_name(&available, ash::khr::get_physical_device_properties2::NAME) {
            exts.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }
    }

    // Validation and the messenger are debug-only and optional.
    let want_debug = cfg!(debug_assertions);
    let has_debug_utils = want_debug && has_name(&available, ash::ext::debug_utils::NAME);
    if has_debug_utils {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let has_validation = want_debug
        && unsafe { entry.enumerate_instance_layer_properties() }
            .unwrap_or_default()
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if has_validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0u32, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        flags,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;
    info!(
        "vk: instance (validation={}, debug_utils={})",
        has_validation, has_debug_utils
    );
    Ok((instance, has_debug_utils))
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .context("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

/// First device with one queue family that does both graphics and present.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in unsafe { instance.enumerate_physical_devices() }
        .context("enumerate_physical_devices")?
    {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(FatalDeviceError::NoSuitableDevice.into())
}

impl DeviceContext {
    /// # Safety
    /// The window behind `window` must outlive the returned context.
    pub unsafe fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        // STRICT ORDER:
        // 1) Instance (platform WSI, optional portability + debug)
        // 2) Surface from THIS instance
        // 3) Physical device + queue family checked against the surface
        // 4) Logical device, queue, command pool
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = unsafe { Entry::load() }.map_err(FatalDeviceError::Loader)?;

        // 1) Instance
        let (instance, has_debug_utils) = unsafe { create_instance(&entry, dh) }?;
        let debug = if has_debug_utils {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("vk: no debug messenger: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        // 2) Surface
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
            .context("ash_window::create_surface")?;

        // 3) Physical device
        let (phys, queue_family) =
            unsafe { pick_device_and_queue(&instance, &surface_loader, surface) }?;
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let features = unsafe { instance.get_physical_device_features(phys) };
        let mem_props = unsafe { instance.get_physical_device_memory_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".into());
        info!(
            "vk: device {} (api {}.{}.{}), queue family {}",
            name,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version),
            queue_family
        );

        // 4) Logical device
        let ext_props = unsafe { instance.enumerate_device_extension_properties(phys) }
            .context("enumerate_device_extension_properties")?;
        let mut device_exts: Vec<*const c_char> = vec![ash::khr::swapchain::NAME.as_ptr()];
        if has_name(&ext_props, ash::khr::portability_subset::NAME) {
            device_exts.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let anisotropy = features.sampler_anisotropy == vk::TRUE;
        let enabled = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: features.sampler_anisotropy,
            ..Default::default()
        };
        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &enabled,
            ..Default::default()
        };
        let device =
            unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .or_fatal("vkCreateCommandPool")?;

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            mem_props,
            device,
            queue,
            cmd_pool,
            max_anisotropy: anisotropy
                .then(|| props.limits.max_sampler_anisotropy.min(MAX_ANISOTROPY)),
        })
    }

    pub fn wait_idle(&self) -> Result<(), FatalDeviceError> {
        unsafe { self.device.device_wait_idle() }.or_fatal("vkDeviceWaitIdle")
    }

    /// Destroys the pool, device, surface, messenger and instance, in that
    /// order.
    ///
    /// # Safety
    /// Every object created from `device` must already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.cmd_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
