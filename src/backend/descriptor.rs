// Descriptor set layout and pool
//
// Layout for every scene object:
//   binding 0 - uniform buffer (MVP), vertex stage
//   binding 1 - combined image sampler, fragment stage

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::Buffer;
use super::texture::Texture;
use super::RenderDevice;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

pub struct DescriptorSetLayout {
    pub handle: vk::DescriptorSetLayout,
    device: Arc<RenderDevice>,
}

impl DescriptorSetLayout {
    pub fn scene_object(device: &Arc<RenderDevice>) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let handle = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// Pool sized for exactly `max_sets` scene-object sets. Destroying the pool
/// frees every set allocated from it.
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    device: Arc<RenderDevice>,
}

impl DescriptorPool {
    pub fn new(device: &Arc<RenderDevice>, max_sets: u32) -> Result<Self> {
        let max_sets = max_sets.max(1);
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: max_sets,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let handle = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(&layouts);

        unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")
    }

    /// Point `set` at `uniform` and `texture`
    pub fn write_object_set(&self, set: vk::DescriptorSet, uniform: &Buffer, texture: &Texture) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform.handle,
            offset: 0,
            range: uniform.size,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler,
            image_view: texture.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe {
            self.device.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.handle, None);
        }
    }
}
