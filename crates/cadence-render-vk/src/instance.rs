// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{GpuError, GpuResult};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes valid callback data for the duration of the call.
    let message = unsafe {
        let data = &*p_callback_data;
        if data.p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    };

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vk {kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vk {kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[vk {kind}] {message}"),
        _ => trace!("[vk {kind}] {message}"),
    }
    vk::FALSE
}

fn has_layer(layers: &[vk::LayerProperties], layer: &CStr) -> bool {
    layers
        .iter()
        .any(|p| p.layer_name_as_c_str().is_ok_and(|name| name == layer))
}

fn layer_available(entry: &Entry, layer: &CStr) -> GpuResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(GpuError::vk("vkEnumerateInstanceLayerProperties"))?;
    Ok(has_layer(&layers, layer))
}

/// Creates the instance with the surface extensions `display` needs, plus the
/// debug-utils extension and validation layer when `validation` is set.
pub fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    application_name: &str,
    validation: bool,
) -> GpuResult<Instance> {
    let app_name = CString::new(application_name.replace('\0', "")).unwrap_or_default();
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"cadence")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(GpuError::vk("vkEnumerateInstanceExtensionProperties"))?
        .to_vec();
    let mut layers = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        if !layer_available(entry, VALIDATION_LAYER)? {
            error!("required validation layer is missing: {VALIDATION_LAYER:?}");
            return Err(GpuError::MissingValidationLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        info!("validation layers enabled");
    }
    for ext in &extensions {
        // SAFETY: every entry points at a static NUL-terminated name.
        debug!("instance extension: {:?}", unsafe { CStr::from_ptr(*ext) });
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(GpuError::vk("vkCreateInstance"))?;
    info!("Vulkan instance created");
    Ok(instance)
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn create(entry: &Entry, instance: &Instance) -> GpuResult<Self> {
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));
        let loader = debug_utils::Instance::new(entry, instance);
        let handle = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .map_err(GpuError::vk("vkCreateDebugUtilsMessengerEXT"))?;
        debug!("Vulkan debugger created");
        Ok(Self { loader, handle })
    }

    pub fn destroy(&mut self) {
        if self.handle != vk::DebugUtilsMessengerEXT::null() {
            unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
            self.handle = vk::DebugUtilsMessengerEXT::null();
        }
    }
}
