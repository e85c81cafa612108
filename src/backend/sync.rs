// Synchronization primitives
//
// Two semaphores are shared by every frame (acquire -> submit, submit ->
// present). Each swapchain image gets its own fence so the CPU never
// re-records a command buffer the GPU is still reading.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::RenderDevice;

/// Semaphore pair shared across frames
pub struct FrameSync {
    /// Signaled by acquire, waited on by submit
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present
    pub render_finished: vk::Semaphore,
    device: Arc<RenderDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            device: device.clone(),
        };
        sync.image_available = sync.create_semaphore()?;
        sync.render_finished = sync.create_semaphore()?;
        Ok(sync)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create semaphore")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
        }
    }
}

/// Per-image fence, created signaled so the first wait returns at once
pub struct Fence {
    pub handle: vk::Fence,
    device: Arc<RenderDevice>,
}

impl Fence {
    pub fn signaled(device: &Arc<RenderDevice>) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let handle = unsafe { device.device.create_fence(&fence_info, None) }
            .context("Failed to create fence")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }

    /// Block without timeout until the GPU signals, then rearm
    pub fn wait_and_reset(&self) -> Result<()> {
        let fences = [self.handle];
        unsafe {
            self.device
                .device
                .wait_for_fences(&fences, true, u64::MAX)
                .context("Failed to wait for fence")?;
            self.device
                .device
                .reset_fences(&fences)
                .context("Failed to reset fence")?;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.handle, None);
        }
    }
}
