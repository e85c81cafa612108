// Render device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layer
// - Surface creation for the window
// - Adapter selection (see `selector`)
// - Logical device with graphics and present queues

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::selector::{self, AdapterCandidate, QueueFamilies, SwapchainSupport};
use crate::config::VALIDATION_LAYER;

/// Instance and its debug messenger, released together
pub struct Instance {
    pub raw: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    // Loader must outlive the instance
    entry: Entry,
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

/// Window surface; must be dropped before its `Instance`
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Vulkan device wrapper, shared by `Arc` with every resource it creates
///
/// IMPORTANT: `Drop` destroys the logical device; the surface and then the
/// instance follow in field order.
pub struct RenderDevice {
    pub swapchain_loader: khr::Swapchain,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub enabled_features: vk::PhysicalDeviceFeatures,

    pub surface: Surface,
    pub instance: Instance,
}

impl RenderDevice {
    /// Create the device for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Request the Khronos validation layer; fails if it is not installed
    pub fn new<W>(window: &W, app_name: &str, enable_validation: bool) -> Result<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance. From here on the guards release whatever
        // was created if a later step fails.
        let raw = Self::create_instance(&entry, window, app_name, enable_validation)?;
        let mut instance = Instance {
            raw,
            debug_utils: None,
            entry,
        };

        // Step 3: Setup debug messenger if validation enabled
        if enable_validation {
            instance.debug_utils = Some(Self::setup_debug_messenger(&instance)?);
        }

        // Step 4: Create surface
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface = Surface {
            handle,
            loader: khr::Surface::new(&instance.entry, &instance.raw),
        };

        // Step 5: Pick physical device (first suitable, queried lazily)
        let devices = unsafe { instance.raw.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;
        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }
        let adapter = selector::select_first(devices, |pd| {
            AdapterCandidate::probe(&instance.raw, &surface.loader, surface.handle, pd)
        })?;
        let physical_device = adapter.physical_device;

        // Step 6: Create logical device
        let supported = unsafe { instance.raw.get_physical_device_features(physical_device) };
        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE)
            .build();

        let device = Self::create_logical_device(
            &instance.raw,
            physical_device,
            adapter.queue_families,
            &enabled_features,
        )?;
        let graphics_queue = unsafe { device.get_device_queue(adapter.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(adapter.queue_families.present, 0) };

        // Step 7: Cache device properties
        let properties = unsafe { instance.raw.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe {
            instance.raw.get_physical_device_memory_properties(physical_device)
        };

        log::info!("Selected GPU: {}", adapter.name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            adapter.queue_families.graphics,
            adapter.queue_families.present
        );

        let swapchain_loader = khr::Swapchain::new(&instance.raw, &device);

        Ok(Arc::new(Self {
            swapchain_loader,
            device,
            physical_device,
            graphics_queue,
            present_queue,
            queue_families: adapter.queue_families,
            properties,
            memory_properties,
            enabled_features,
            surface,
            instance,
        }))
    }

    fn create_instance<W: HasRawDisplayHandle>(
        entry: &Entry,
        window: &W,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform
        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .context("Failed to query required surface extensions")?
                .to_vec();

        let layer_names = if enable_validation {
            if !Self::validation_layer_available(entry)? {
                anyhow::bail!(
                    "Validation layer {:?} requested but not available",
                    VALIDATION_LAYER
                );
            }
            extensions.push(DebugUtils::name().as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        Ok(layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        }))
    }

    fn setup_debug_messenger(
        instance: &Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(&instance.entry, &instance.raw);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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
            debug_utils.create_debug_utils_messenger(&create_info, None)
        }
        .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
        features: &vk::PhysicalDeviceFeatures,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = selector::required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")
    }

    /// Fresh surface support for the selected adapter
    pub fn query_surface(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(&self.surface.loader, self.physical_device, self.surface.handle)
    }

    pub fn format_features(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .raw
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    pub fn max_sampler_anisotropy(&self) -> Option<f32> {
        (self.enabled_features.sampler_anisotropy == vk::TRUE)
            .then_some(self.properties.limits.max_sampler_anisotropy)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Surface and instance follow through their own Drop
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
