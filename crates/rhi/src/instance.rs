//! Vulkan instance management.
//!
//! This module handles VkInstance creation, validation layers, and debug messengers.
//!
//! # Overview
//!
//! The [`Instance`] struct owns the loader entry and the instance handle. The
//! extensions and layers it enables come from an explicit [`InstanceConfig`];
//! required extensions are checked against the loader's extension list before the
//! instance is created so a missing one is reported by name.

use std::borrow::Cow;
use std::ffi::{CStr, CString};

use ash::{vk, Entry};
use tracing::{error, info, warn};

use crate::capabilities::{
    list_instance_extensions, list_instance_layers, required_extensions_supported,
};
use crate::error::{RhiError, RhiResult};

/// Instance-creation settings.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Application name reported to the driver.
    pub application_name: String,
    /// Extensions the instance cannot work without (window-system surface extensions).
    pub required_extensions: Vec<String>,
    /// Enables the validation layers and the debug messenger.
    pub enable_validation: bool,
    /// Layers to enable when validation is on.
    pub validation_layers: Vec<String>,
}

/// Vulkan instance wrapper with optional validation layer support.
///
/// This struct manages the lifetime of the Vulkan instance and its associated
/// debug utilities. When dropped, it destroys the messenger and then the instance.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Vulkan library cannot be loaded
    /// - A required extension is not available ([`RhiError::MissingExtensions`])
    /// - Instance creation fails
    /// - Debug messenger setup fails (when validation is enabled)
    pub fn new(config: &InstanceConfig) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let available_extensions = list_instance_extensions(&entry)?;
        required_extensions_supported(&config.required_extensions, &available_extensions)
            .into_result("instance")?;

        let layers = if config.enable_validation {
            Self::available_validation_layers(&entry, &config.validation_layers)?
        } else {
            Vec::new()
        };
        let debug_utils_name = ash::ext::debug_utils::NAME.to_string_lossy().into_owned();
        let debug_utils_available = available_extensions.contains(&debug_utils_name);
        let validation_enabled =
            config.enable_validation && !layers.is_empty() && debug_utils_available;
        if config.enable_validation && !validation_enabled {
            warn!("Validation requested but not available, proceeding without it");
        }

        let mut extensions = to_cstrings(&config.required_extensions)?;
        if validation_enabled {
            extensions.push(ash::ext::debug_utils::NAME.to_owned());
        }
        let layers = if validation_enabled { layers } else { Vec::new() };

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| RhiError::InvalidArgument(format!("application name: {}", e)))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkframe")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layers.iter().map(|layer| layer.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(RhiError::creation("instance"))?
        };

        info!(
            "Vulkan instance created with {} extension(s), {} layer(s)",
            extension_ptrs.len(),
            layer_ptrs.len()
        );

        let (debug_utils, debug_messenger) = if validation_enabled {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Filters the requested validation layers down to the ones installed.
    fn available_validation_layers(entry: &Entry, requested: &[String]) -> RhiResult<Vec<CString>> {
        let available = list_instance_layers(entry)?;
        let mut layers = Vec::with_capacity(requested.len());
        for name in requested {
            if available.contains(name) {
                layers.push(CString::new(name.as_str()).map_err(|e| {
                    RhiError::InvalidArgument(format!("layer name {}: {}", name, e))
                })?);
            } else {
                warn!("Validation layer {} not available, skipping", name);
            }
        }
        Ok(layers)
    }

    /// Sets up the debug messenger for validation layer callbacks.
    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RhiError::creation("debug messenger"))?
        };
        info!("Debug messenger created");

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Converts extension or layer names into NUL-terminated strings.
pub(crate) fn to_cstrings(names: &[String]) -> RhiResult<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|e| RhiError::InvalidArgument(format!("name {:?}: {}", name, e)))
        })
        .collect()
}

/// Routes validation layer messages into `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid (or null) callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[Vulkan {}] {}", type_str, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message)
        }
        _ => info!("[Vulkan {}] {}", type_str, message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_cstrings_rejects_interior_nul() {
        let names = vec!["VK_KHR_surface".to_string(), "bad\0name".to_string()];
        assert!(matches!(to_cstrings(&names), Err(RhiError::InvalidArgument(_))));

        let ok = to_cstrings(&names[..1]).unwrap();
        assert_eq!(ok[0].as_c_str(), ash::khr::surface::NAME);
    }

    #[test]
    fn test_headless_instance_creation() {
        // Requires a Vulkan loader and driver
        let config = InstanceConfig {
            application_name: "vkframe-test".into(),
            ..Default::default()
        };
        match Instance::new(&config) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) | Err(RhiError::VulkanError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(RhiError::CreationFailed { result, .. }) => {
                eprintln!("Skipping test: no Vulkan driver ({})", result);
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_missing_required_extension_is_reported() {
        let config = InstanceConfig {
            application_name: "vkframe-test".into(),
            required_extensions: vec!["VK_VKFRAME_does_not_exist".into()],
            ..Default::default()
        };
        match Instance::new(&config) {
            Err(RhiError::MissingExtensions { scope, missing }) => {
                assert_eq!(scope, "instance");
                assert_eq!(missing, vec!["VK_VKFRAME_does_not_exist".to_string()]);
            }
            Err(RhiError::LoadingError(_)) | Err(RhiError::VulkanError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Ok(_) => panic!("instance created with an unknown extension"),
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}
