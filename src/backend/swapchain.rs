// Swapchain - Window presentation
//
// The decisions (format, present mode, extent, image count, sharing) are
// plain functions over the queried surface support so they can be checked
// without a GPU. `Swapchain` owns the resulting chain and its image views.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::selector::{QueueFamilies, SwapchainSupport};
use super::RenderDevice;

/// Prefer BGRA8 sRGB with the sRGB non-linear color space, else the first
/// format the surface lists.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when offered, otherwise FIFO (always available)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Extent bounds the surface allows when it leaves the size to us
#[derive(Debug, Clone, Copy)]
pub struct ExtentBounds {
    pub min: vk::Extent2D,
    pub max: vk::Extent2D,
}

impl ExtentBounds {
    /// `None` when the surface dictates `current_extent`
    pub fn from_capabilities(caps: &vk::SurfaceCapabilitiesKHR) -> Option<Self> {
        if caps.current_extent.width != u32::MAX {
            return None;
        }
        Some(Self {
            min: caps.min_image_extent,
            max: caps.max_image_extent,
        })
    }

    pub fn clamp(&self, extent: vk::Extent2D) -> vk::Extent2D {
        vk::Extent2D {
            width: extent.width.max(self.min.width).min(self.max.width),
            height: extent.height.max(self.min.height).min(self.max.height),
        }
    }
}

/// The surface's `current_extent`, or the framebuffer size clamped to the
/// capability bounds when the surface reports the `u32::MAX` sentinel.
pub fn compute_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    match ExtentBounds::from_capabilities(caps) {
        Some(bounds) => bounds.clamp(framebuffer),
        None => caps.current_extent,
    }
}

/// clamp(min + 1, min, max), where a max of zero means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent([u32; 2]),
}

impl ImageSharing {
    pub fn for_families(families: QueueFamilies) -> Self {
        if families.is_shared() {
            Self::Exclusive
        } else {
            Self::Concurrent([families.graphics, families.present])
        }
    }
}

/// Everything needed to create a chain, decided up front
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub bounds: Option<ExtentBounds>,
    pub image_count: u32,
    pub sharing: ImageSharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        support: &SwapchainSupport,
        families: QueueFamilies,
        framebuffer: vk::Extent2D,
    ) -> Result<Self> {
        let caps = &support.capabilities;
        let surface_format = choose_surface_format(&support.formats)
            .context("Surface reports no formats")?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: compute_extent(caps, framebuffer),
            bounds: ExtentBounds::from_capabilities(caps),
            image_count: choose_image_count(caps),
            sharing: ImageSharing::for_families(families),
            pre_transform: caps.current_transform,
        })
    }
}

/// Result of asking for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of handing an image back to the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl AcquireOutcome {
    pub fn from_vk(result: ash::prelude::VkResult<(u32, bool)>) -> Result<Self> {
        match result {
            Ok((image_index, suboptimal)) => Ok(Self::Ready { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }
}

impl PresentOutcome {
    pub fn from_vk(result: ash::prelude::VkResult<bool>) -> Result<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<RenderDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<RenderDevice>, plan: &SwapchainPlan) -> Result<Self> {
        let queue_family_indices = match plan.sharing {
            ImageSharing::Exclusive => Vec::new(),
            ImageSharing::Concurrent(families) => families.to_vec(),
        };
        let sharing_mode = match plan.sharing {
            ImageSharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            ImageSharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface.handle)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let swapchain = unsafe {
            device.swapchain_loader.create_swapchain(&create_info, None)
        }
        .context("Failed to create swapchain")?;

        let mut chain = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
            device,
        };

        chain.images = unsafe {
            chain.device.swapchain_loader.get_swapchain_images(swapchain)
        }
        .context("Failed to get swapchain images")?;

        // Pushed one at a time so Drop releases whatever was created
        for i in 0..chain.images.len() {
            let view = chain.create_view(chain.images[i])?;
            chain.image_views.push(view);
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            plan.extent.width,
            plan.extent.height,
            chain.images.len(),
            plan.surface_format.format,
            plan.present_mode
        );

        Ok(chain)
    }

    fn create_view(&self, image: vk::Image) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&create_info, None) }
            .context("Failed to create swapchain image view")
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Blocks without timeout until an image is available
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquireOutcome> {
        AcquireOutcome::from_vk(unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        })
    }

    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        PresentOutcome::from_vk(unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
