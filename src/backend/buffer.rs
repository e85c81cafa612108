// GPU memory: buffers and images
//
// Every allocation is a dedicated `vkAllocateMemory`. Host-visible buffers
// are mapped only for the duration of a write.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::commands::Uploader;
use super::RenderDevice;

/// Candidates for the depth attachment, in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

/// Find a memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);
            has_type && has_properties
        })
        .with_context(|| format!("Failed to find suitable memory type for {:?}", properties))
}

/// First candidate whose optimal-tiling features include a depth attachment
pub fn pick_depth_format<F>(candidates: &[vk::Format], mut features: F) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates.iter().copied().find(|&format| {
        features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn find_depth_format(device: &RenderDevice) -> Result<vk::Format> {
    pick_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        device.format_features(format).optimal_tiling_features
    })
    .context("No supported depth format")
}

pub struct Buffer {
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<RenderDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<RenderDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mut buffer = Self {
            handle,
            memory: vk::DeviceMemory::null(),
            size,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };
        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            memory_properties,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        buffer.memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;

        unsafe { device.device.bind_buffer_memory(handle, buffer.memory, 0) }
            .context("Failed to bind buffer memory")?;

        Ok(buffer)
    }

    /// Host-visible, coherent buffer
    pub fn host_visible(
        device: &Arc<RenderDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: &Arc<RenderDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::host_visible(device, bytes.len() as vk::DeviceSize, usage)?;
        buffer.write(bytes)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a staging copy
    pub fn device_local<T: Pod>(
        device: &Arc<RenderDevice>,
        uploader: &Uploader,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let staging = Self::with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, data)?;
        let buffer = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        uploader.submit(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, staging.handle, buffer.handle, &[region]);
        })?;

        Ok(buffer)
    }

    /// Map, copy, unmap. Fails if `bytes` does not fit.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as vk::DeviceSize;
        if len > self.size {
            anyhow::bail!("Write of {} bytes overflows {} byte buffer", len, self.size);
        }

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *mut u8;

            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.handle, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// 2D image parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Device-local 2D image with its memory and a full view
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<RenderDevice>,
}

impl Image {
    pub fn new(device: &Arc<RenderDevice>, desc: ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create image")?;

        let mut image = Self {
            handle,
            view: vk::ImageView::null(),
            memory: vk::DeviceMemory::null(),
            format: desc.format,
            extent: desc.extent,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(handle) };
        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        image.memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate image memory")?;

        unsafe { device.device.bind_image_memory(handle, image.memory, 0) }
            .context("Failed to bind image memory")?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        image.view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")?;

        Ok(image)
    }

    /// Depth attachment at `extent`
    pub fn depth(device: &Arc<RenderDevice>, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        Self::new(
            device,
            ImageDesc {
                extent,
                format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.handle, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert!(find_memory_type(&props, 0b001, host).is_err());
    }

    #[test]
    fn test_pick_depth_format_order() {
        let only_packed = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT || format == vk::Format::D32_SFLOAT_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, only_packed),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );

        let everything = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, everything),
            Some(vk::Format::D32_SFLOAT)
        );

        let nothing = |_: vk::Format| vk::FormatFeatureFlags::empty();
        assert_eq!(pick_depth_format(&DEPTH_FORMAT_CANDIDATES, nothing), None);
    }
}
