// Graphics pipeline creation and management
//
// Everything here depends on the swapchain (format, extent) and is rebuilt
// with it. Viewport and scissor are baked into the pipeline.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::descriptor::DescriptorSetLayout;
use super::shader::ShaderModule;
use super::RenderDevice;
use crate::mesh::Vertex;

/// Color (swapchain image) + depth, one subpass
pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Arc<RenderDevice>,
}

impl RenderPass {
    pub fn new(
        device: &Arc<RenderDevice>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachment_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_attachment_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let color_attachments = [color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachments)
            .depth_stencil_attachment(&depth_attachment_ref)
            .build();

        // Wait for the acquired image before writing color and depth
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build();

        let attachments = [color_attachment, depth_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.handle, None);
        }
    }
}

/// One framebuffer per swapchain image, all sharing the depth view
pub struct Framebuffers {
    pub handles: Vec<vk::Framebuffer>,
    device: Arc<RenderDevice>,
}

impl Framebuffers {
    pub fn new(
        device: &Arc<RenderDevice>,
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut framebuffers = Self {
            handles: Vec::with_capacity(image_views.len()),
            device: device.clone(),
        };

        for &image_view in image_views {
            let attachments = [image_view, depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let handle = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            framebuffers.handles.push(handle);
        }

        Ok(framebuffers)
    }

    pub fn get(&self, index: usize) -> Result<vk::Framebuffer> {
        self.handles
            .get(index)
            .copied()
            .with_context(|| format!("No framebuffer for image {}", index))
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.handles {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

pub struct PipelineLayout {
    pub handle: vk::PipelineLayout,
    device: Arc<RenderDevice>,
}

impl PipelineLayout {
    pub fn new(device: &Arc<RenderDevice>, set_layouts: &[&DescriptorSetLayout]) -> Result<Self> {
        let handles: Vec<_> = set_layouts.iter().map(|layout| layout.handle).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&handles);

        let handle = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline_layout(self.handle, None);
        }
    }
}

pub struct Pipeline {
    pub handle: vk::Pipeline,
    device: Arc<RenderDevice>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.handle, None);
        }
    }
}

/// Fixed-function state plus shader stages for the scene pipeline
pub struct PipelineBuilder<'a> {
    vertex_shader: &'a ShaderModule,
    fragment_shader: &'a ShaderModule,
    extent: vk::Extent2D,
    polygon_mode: vk::PolygonMode,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(vertex_shader: &'a ShaderModule, fragment_shader: &'a ShaderModule) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            extent: vk::Extent2D { width: 1, height: 1 },
            polygon_mode: vk::PolygonMode::FILL,
        }
    }

    /// Viewport and scissor cover the whole of `extent`
    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = extent;
        self
    }

    /// `LINE` needs the `fill_mode_non_solid` device feature
    pub fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn build(
        &self,
        device: &Arc<RenderDevice>,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
    ) -> Result<Pipeline> {
        let entry_point = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_shader.handle)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_shader.handle)
                .name(entry_point)
                .build(),
        ];

        // Vertex input
        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Opaque, no blending
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout.handle)
            .render_pass(render_pass.handle)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;

        let handle = pipelines
            .first()
            .copied()
            .context("Driver returned no pipeline")?;

        Ok(Pipeline {
            handle,
            device: device.clone(),
        })
    }
}
