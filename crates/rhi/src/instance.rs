//! `VkInstance` ownership and the validation-layer hookup.
//!
//! When validation is on, layer output is forwarded to `tracing` under the
//! `vulkan` target so it can be filtered with `RUST_LOG=vulkan=warn`.
//!
//! ```no_run
//! use inflight_rhi::instance::Instance;
//!
//! # fn run() -> inflight_rhi::RhiResult<()> {
//! // The window layer supplies the platform surface extensions.
//! let instance = Instance::new(cfg!(debug_assertions), &[])?;
//! println!("validation: {}", instance.has_validation());
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiResult;

const KHRONOS_VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"inflight";

type Messenger = (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT);

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    messenger: Option<Messenger>,
}

impl Instance {
    /// Loads the Vulkan library and creates a 1.3 instance.
    ///
    /// `VK_KHR_surface` is always enabled on top of `surface_extensions`.
    /// Asking for validation on a machine without the Khronos layer is not an
    /// error; the instance is created without it.
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        // SAFETY: the loaded library stays alive inside `Entry` for as long as
        // any handle created from it.
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && has_layer(&entry, KHRONOS_VALIDATION)?;
        if enable_validation && !validation {
            warn!("validation layer not installed, continuing without it");
        }

        let version = vk::make_api_version(0, 0, 1, 0);
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(version)
            .engine_name(APP_NAME)
            .engine_version(version)
            .api_version(vk::API_VERSION_1_3);

        let extensions = instance_extensions(surface_extensions, validation);
        let validation_layer = [KHRONOS_VALIDATION.as_ptr()];
        let layers: &[*const c_char] = if validation { &validation_layer } else { &[] };

        let raw = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&app_info)
                    .enabled_extension_names(&extensions)
                    .enabled_layer_names(layers),
                None,
            )?
        };

        let messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &raw);
            match create_messenger(&loader) {
                Ok(handle) => Some((loader, handle)),
                Err(e) => {
                    unsafe { raw.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            extensions = extensions.len(),
            validation,
            "vulkan instance created"
        );
        Ok(Self {
            entry,
            raw,
            messenger,
        })
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// True only if validation was asked for and the layer was found.
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some((loader, handle)) = self.messenger.take() {
            unsafe { loader.destroy_debug_utils_messenger(handle, None) };
        }
        unsafe { self.raw.destroy_instance(None) };
        debug!("vulkan instance destroyed");
    }
}

/// `VK_KHR_surface` first, then the platform extensions without duplicates,
/// then debug utils when validating.
fn instance_extensions(surface_extensions: &[*const c_char], validation: bool) -> Vec<*const c_char> {
    let base = ash::khr::surface::NAME;
    let mut names = Vec::with_capacity(surface_extensions.len() + 2);
    names.push(base.as_ptr());
    for &ext in surface_extensions {
        // SAFETY: extension names handed in are NUL-terminated static strings.
        if unsafe { CStr::from_ptr(ext) } != base {
            names.push(ext);
        }
    }
    if validation {
        names.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    names
}

fn has_layer(entry: &Entry, wanted: &CStr) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == wanted)))
}

fn create_messenger(
    loader: &ash::ext::debug_utils::Instance,
) -> RhiResult<vk::DebugUtilsMessengerEXT> {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    use vk::DebugUtilsMessageTypeFlagsEXT as Kind;

    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(Severity::WARNING | Severity::ERROR)
        .message_type(Kind::GENERAL | Kind::VALIDATION | Kind::PERFORMANCE)
        .pfn_user_callback(Some(forward_to_tracing));
    Ok(unsafe { loader.create_debug_utils_messenger(&info, None)? })
}

/// # Safety
///
/// Invoked by the loader; `data` is either null or valid for the call.
unsafe extern "system" fn forward_to_tracing(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    let Some(data) = (unsafe { data.as_ref() }) else {
        return vk::FALSE;
    };
    let text = match unsafe { data.message_as_c_str() } {
        Some(text) => text.to_string_lossy(),
        None => Cow::Borrowed("<empty>"),
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", kind = ?kind, "{text}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", kind = ?kind, "{text}");
    } else {
        debug!(target: "vulkan", kind = ?kind, "{text}");
    }
    vk::FALSE
}
