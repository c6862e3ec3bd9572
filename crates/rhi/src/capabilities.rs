//! Extension and layer probing.
//!
//! Queries never have side effects beyond the driver call. Support checks
//! always report which required names are missing.

use std::collections::BTreeSet;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Outcome of checking a required list against an available set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportReport {
    /// Required names absent from the available set, in request order.
    pub missing: Vec<String>,
}

impl SupportReport {
    /// Returns true when every required name is available.
    #[inline]
    pub fn is_supported(&self) -> bool {
        self.missing.is_empty()
    }

    /// Converts an unsupported report into a [`RhiError::MissingExtensions`].
    pub fn into_result(self, scope: &'static str) -> RhiResult<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(RhiError::MissingExtensions {
                scope,
                missing: self.missing,
            })
        }
    }
}

/// Checks `required` against `available`.
///
/// Each required name is logged as supported or not supported.
pub fn required_extensions_supported<S: AsRef<str>>(
    required: &[S],
    available: &BTreeSet<String>,
) -> SupportReport {
    let mut missing = Vec::new();
    for name in required {
        let name = name.as_ref();
        if available.contains(name) {
            info!("{} - supported", name);
        } else {
            warn!("{} - not supported", name);
            missing.push(name.to_owned());
        }
    }
    SupportReport { missing }
}

/// Lists the instance extensions exposed by the loader.
pub fn list_instance_extensions(entry: &ash::Entry) -> RhiResult<BTreeSet<String>> {
    let properties = unsafe { entry.enumerate_instance_extension_properties(None)? };
    let names = extension_names(&properties);
    debug!("{} instance extension(s) available: {:?}", names.len(), names);
    Ok(names)
}

/// Lists the instance layers exposed by the loader.
pub fn list_instance_layers(entry: &ash::Entry) -> RhiResult<BTreeSet<String>> {
    let properties = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(properties
        .iter()
        .filter_map(|layer| layer.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

/// Lists the device extensions exposed by `adapter`.
pub fn list_device_extensions(
    instance: &ash::Instance,
    adapter: vk::PhysicalDevice,
) -> RhiResult<BTreeSet<String>> {
    let properties = unsafe { instance.enumerate_device_extension_properties(adapter)? };
    let names = extension_names(&properties);
    debug!("{} device extension(s) available", names.len());
    Ok(names)
}

fn extension_names(properties: &[vk::ExtensionProperties]) -> BTreeSet<String> {
    properties
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}
