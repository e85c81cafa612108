// Command pools and command buffers
//
// `Uploader` is the one place that records and submits short-lived work
// (buffer copies, layout transitions) and blocks until the queue drains.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::RenderDevice;

pub struct CommandPool {
    pub handle: vk::CommandPool,
    device: Arc<RenderDevice>,
}

impl CommandPool {
    pub fn new(
        device: &Arc<RenderDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        let handle = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }

    /// Primary command buffers, freed when the returned set drops.
    /// The set must not outlive this pool.
    pub fn allocate(&self, count: u32) -> Result<CommandBuffers> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        Ok(CommandBuffers {
            buffers,
            pool: self.handle,
            device: self.device.clone(),
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.handle, None);
        }
    }
}

pub struct CommandBuffers {
    pub buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<RenderDevice>,
}

impl CommandBuffers {
    pub fn get(&self, index: usize) -> Result<vk::CommandBuffer> {
        self.buffers
            .get(index)
            .copied()
            .with_context(|| format!("No command buffer for image {}", index))
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device.device.free_command_buffers(self.pool, &self.buffers);
            }
        }
    }
}

/// Immediate-submit helper on the graphics queue
pub struct Uploader {
    pool: CommandPool,
    queue: vk::Queue,
    device: Arc<RenderDevice>,
}

impl Uploader {
    pub fn new(device: &Arc<RenderDevice>) -> Result<Self> {
        let pool = CommandPool::new(
            device,
            device.queue_families.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            pool,
            queue: device.graphics_queue,
            device: device.clone(),
        })
    }

    /// Allocate, record through `record`, submit, wait for the queue, free
    pub fn submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let commands = self.pool.allocate(1)?;
        let cmd = commands.get(0)?;
        let device = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin upload commands")?;
        }

        record(device, cmd);

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            device
                .end_command_buffer(cmd)
                .context("Failed to end upload commands")?;
            device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit upload commands")?;
            device
                .queue_wait_idle(self.queue)
                .context("Failed to wait for upload queue")?;
        }

        Ok(())
    }
}
