// Device selection
//
// Adapters are queried in enumeration order and the first one that can both
// render and present to the surface wins. There is no scoring: a discrete
// GPU listed after a suitable integrated one is never considered.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;

/// Device extensions every adapter must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Queue family indices as discovered on one adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Both queue roles resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Walk the families in order. A graphics-capable family overwrites
    /// `graphics`, a present-capable family overwrites `present`, and the
    /// walk stops as soon as both are set.
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if family.queue_count > 0 && supports_present(index)? {
                indices.present = Some(index);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Surface support of one adapter/surface pair
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query surface present modes")?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything the selector learned about one adapter
#[derive(Debug, Clone)]
pub struct AdapterCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub extensions_supported: bool,
    pub swapchain_support: SwapchainSupport,
}

impl AdapterCandidate {
    /// Probe one adapter against the surface
    pub fn probe(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let queue_families = QueueFamilyIndices::find(&families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(physical_device, index, surface)
                .context("Failed to query surface support")
        })?;

        let available = unsafe {
            instance.enumerate_device_extension_properties(physical_device)
        }
        .context("Failed to enumerate device extensions")?;
        let missing = missing_extensions(&available, &required_device_extensions());
        if !missing.is_empty() {
            log::debug!("{}: missing device extensions {:?}", name, missing);
        }

        let swapchain_support = SwapchainSupport::query(surface_loader, physical_device, surface)?;

        Ok(Self {
            physical_device,
            name,
            queue_families,
            extensions_supported: missing.is_empty(),
            swapchain_support,
        })
    }

    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.extensions_supported
            && self.swapchain_support.is_adequate()
    }
}

/// Names from `required` that `available` does not list
pub fn missing_extensions<'a>(
    available: &[vk::ExtensionProperties],
    required: &[&'a CStr],
) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *name)
        })
        .collect()
}

/// Adapter chosen for device creation
#[derive(Debug, Clone)]
pub struct SelectedAdapter {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilies,
}

/// First suitable candidate in enumeration order
pub fn select_adapter<I>(candidates: I) -> Result<SelectedAdapter>
where
    I: IntoIterator<Item = AdapterCandidate>,
{
    for candidate in candidates {
        if !candidate.is_suitable() {
            log::info!("Skipping unsuitable GPU: {}", candidate.name);
            continue;
        }
        if let Some(queue_families) = candidate.queue_families.resolve() {
            return Ok(SelectedAdapter {
                physical_device: candidate.physical_device,
                name: candidate.name,
                queue_families,
            });
        }
    }

    anyhow::bail!("No suitable GPU found")
}

/// Query `adapters` in order and stop at the first suitable one. An adapter
/// that cannot be queried counts as unsuitable; adapters after the winner
/// are never queried.
pub fn select_first<I, F>(adapters: I, mut query: F) -> Result<SelectedAdapter>
where
    I: IntoIterator<Item = vk::PhysicalDevice>,
    F: FnMut(vk::PhysicalDevice) -> Result<AdapterCandidate>,
{
    let candidates = adapters.into_iter().filter_map(|physical_device| {
        match query(physical_device) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Skipping GPU that could not be queried: {:#}", e);
                None
            }
        }
    });
    select_adapter(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    fn adequate_support() -> SwapchainSupport {
        SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn candidate(raw: u64, graphics: Option<u32>, present: Option<u32>) -> AdapterCandidate {
        AdapterCandidate {
            physical_device: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{}", raw),
            queue_families: QueueFamilyIndices { graphics, present },
            extensions_supported: true,
            swapchain_support: adequate_support(),
        }
    }

    #[test]
    fn test_single_family_fills_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert!(indices.resolve().unwrap().is_shared());
    }

    #[test]
    fn test_find_stops_once_both_roles_resolved() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut visited = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |index| {
            visited.push(index);
            Ok(index == 2)
        })
        .unwrap();

        // graphics is overwritten by family 1, family 3 is never visited
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(visited, vec![0, 1, 2]);
    }

    #[test]
    fn test_find_is_deterministic() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let present = |index: u32| -> Result<bool> { Ok(index != 0) };

        let first = QueueFamilyIndices::find(&families, present).unwrap();
        let second = QueueFamilyIndices::find(&families, present).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.resolve(), Some(QueueFamilies { graphics: 1, present: 1 }));
    }

    #[test]
    fn test_missing_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices.resolve(), None);
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilies { graphics: 0, present: 0 };
        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(shared.unique(), vec![0]);
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn test_missing_extensions() {
        let available = [extension(c"VK_KHR_maintenance1")];
        let missing = missing_extensions(&available, &required_device_extensions());
        assert_eq!(missing, vec![khr::Swapchain::name()]);

        let available = [extension(c"VK_KHR_maintenance1"), extension(khr::Swapchain::name())];
        assert!(missing_extensions(&available, &required_device_extensions()).is_empty());
    }

    #[test]
    fn test_select_first_suitable_adapter() {
        let mut no_modes = candidate(2, Some(0), Some(0));
        no_modes.swapchain_support.present_modes.clear();

        let candidates = vec![
            candidate(1, Some(0), None),
            no_modes,
            candidate(3, Some(0), Some(1)),
            candidate(4, Some(0), Some(0)),
        ];

        let selected = select_adapter(candidates).unwrap();
        assert_eq!(selected.physical_device.as_raw(), 3);
        assert_eq!(selected.queue_families, QueueFamilies { graphics: 0, present: 1 });
    }

    #[test]
    fn test_select_first_stops_at_first_suitable() {
        let mut queried = Vec::new();
        let adapters = (1..=4).map(vk::PhysicalDevice::from_raw);

        let selected = select_first(adapters, |pd| {
            queried.push(pd.as_raw());
            match pd.as_raw() {
                1 => Ok(candidate(1, Some(0), None)),
                2 => Ok(candidate(2, Some(0), Some(0))),
                _ => anyhow::bail!("adapter {} lost", pd.as_raw()),
            }
        })
        .unwrap();

        assert_eq!(selected.physical_device.as_raw(), 2);
        assert_eq!(queried, vec![1, 2]);
    }

    #[test]
    fn test_select_first_skips_adapters_that_fail_to_query() {
        let adapters = (1..=3).map(vk::PhysicalDevice::from_raw);

        let selected = select_first(adapters, |pd| match pd.as_raw() {
            3 => Ok(candidate(3, Some(1), Some(1))),
            raw => anyhow::bail!("surface query failed on adapter {}", raw),
        })
        .unwrap();
        assert_eq!(selected.physical_device.as_raw(), 3);

        let none = select_first((1..=2).map(vk::PhysicalDevice::from_raw), |_| {
            anyhow::bail!("no surface support")
        });
        assert!(none.is_err());
    }

    #[test]
    fn test_no_suitable_adapter_is_an_error() {
        let mut no_extension = candidate(1, Some(0), Some(0));
        no_extension.extensions_supported = false;

        let err = select_adapter(vec![no_extension]).unwrap_err();
        assert!(err.to_string().contains("No suitable GPU"));
        assert!(select_adapter(Vec::new()).is_err());
    }
}
