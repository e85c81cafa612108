// Sampled textures
//
// Pixels go through a staging buffer: UNDEFINED -> TRANSFER_DST_OPTIMAL,
// copy, TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL, all in a single
// immediate submit.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::buffer::{Buffer, Image, ImageDesc};
use super::commands::Uploader;
use super::RenderDevice;

/// Access masks and stages for a supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Self> {
        match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(Self {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            }),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
                Ok(Self {
                    src_access: vk::AccessFlags::TRANSFER_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    src_stage: vk::PipelineStageFlags::TRANSFER,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                })
            }
            _ => anyhow::bail!("Unsupported layout transition {:?} -> {:?}", old, new),
        }
    }

    fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

pub struct Texture {
    pub image: Image,
    pub sampler: vk::Sampler,
    device: Arc<RenderDevice>,
}

impl Texture {
    pub fn load(device: &Arc<RenderDevice>, uploader: &Uploader, path: &Path) -> Result<Self> {
        let pixels = image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .into_rgba8();
        let (width, height) = pixels.dimensions();

        log::debug!("Loaded texture {:?} ({}x{})", path, width, height);
        Self::from_rgba8(device, uploader, width, height, pixels.as_raw())
    }

    /// 1x1 opaque white, for meshes without a texture
    pub fn white(device: &Arc<RenderDevice>, uploader: &Uploader) -> Result<Self> {
        Self::from_rgba8(device, uploader, 1, 1, &[255, 255, 255, 255])
    }

    pub fn from_rgba8(
        device: &Arc<RenderDevice>,
        uploader: &Uploader,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            anyhow::bail!(
                "Texture data is {} bytes, expected {} for {}x{} RGBA8",
                pixels.len(),
                expected,
                width,
                height
            );
        }

        let staging = Buffer::with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
        let image = Image::new(
            device,
            ImageDesc {
                extent: vk::Extent2D { width, height },
                format: vk::Format::R8G8B8A8_SRGB,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        )?;

        let to_transfer = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let to_shader = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width, height, depth: 1 })
            .build();

        uploader.submit(|vk_device, cmd| {
            to_transfer.record(
                vk_device,
                cmd,
                image.handle,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            unsafe {
                vk_device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle,
                    image.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            to_shader.record(
                vk_device,
                cmd,
                image.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        let sampler = Self::create_sampler(device)?;

        Ok(Self {
            image,
            sampler,
            device: device.clone(),
        })
    }

    fn create_sampler(device: &RenderDevice) -> Result<vk::Sampler> {
        let anisotropy = device.max_sampler_anisotropy();

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0).min(16.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);

        unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}
