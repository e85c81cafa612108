// Vulkan frame backend
//
// Owns the long-lived objects (device, pools, semaphores, descriptor set
// layout, scene) and the `ChainResources` that are rebuilt with the
// swapchain.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::{self, Image};
use crate::backend::commands::{CommandBuffers, CommandPool, Uploader};
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::backend::pipeline::{Framebuffers, Pipeline, PipelineBuilder, PipelineLayout, RenderPass};
use crate::backend::selector::{QueueFamilies, SwapchainSupport};
use crate::backend::shader::{self, ShaderModule};
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome, SwapchainPlan};
use crate::backend::sync::{Fence, FrameSync};
use crate::backend::{RenderDevice, Swapchain};
use crate::config::Config;
use crate::frame::FrameBackend;
use crate::scene::Scene;

/// Everything sized by the swapchain.
///
/// IMPORTANT: Field order is teardown order. Framebuffers, pipeline,
/// render pass, pipeline layout and command buffers go first, then the
/// depth image, and the swapchain (views, then chain) goes last.
struct ChainResources {
    framebuffers: Framebuffers,
    pipeline: Pipeline,
    render_pass: RenderPass,
    pipeline_layout: PipelineLayout,
    command_buffers: CommandBuffers,
    fences: Vec<Fence>,
    // Held only for teardown
    _descriptor_pool: DescriptorPool,
    _depth: Image,
    swapchain: Swapchain,
}

impl ChainResources {
    fn fence(&self, slot: usize) -> Result<&Fence> {
        self.fences
            .get(slot)
            .with_context(|| format!("No fence for image {}", slot))
    }
}

pub struct VulkanBackend {
    chain: Option<ChainResources>,
    scene: Scene,
    sync: FrameSync,
    set_layout: DescriptorSetLayout,
    command_pool: CommandPool,
    vertex_spirv: Vec<u32>,
    fragment_spirv: Vec<u32>,
    clear_color: [f32; 4],
    polygon_mode: vk::PolygonMode,
    window: Arc<Window>,
    device: Arc<RenderDevice>,
}

impl VulkanBackend {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let device = RenderDevice::new(
            window.as_ref(),
            &config.window.title,
            config.validation_enabled(),
        )?;

        let shader_dir = Path::new(&config.graphics.shader_dir);
        let vertex_spirv = shader::load_spirv(&shader_dir.join("scene.vert.spv"))?;
        let fragment_spirv = shader::load_spirv(&shader_dir.join("scene.frag.spv"))?;

        let command_pool = CommandPool::new(
            &device,
            device.queue_families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let set_layout = DescriptorSetLayout::scene_object(&device)?;
        let sync = FrameSync::new(&device)?;

        // Geometry and textures are uploaded once; the transient pool goes away after
        let scene = {
            let uploader = Uploader::new(&device)?;
            Scene::load(&device, &uploader, &config.objects)?
        };

        let polygon_mode = if config.graphics.wireframe {
            if device.enabled_features.fill_mode_non_solid == vk::TRUE {
                vk::PolygonMode::LINE
            } else {
                log::warn!("Wireframe requested but fill_mode_non_solid is unsupported");
                vk::PolygonMode::FILL
            }
        } else {
            vk::PolygonMode::FILL
        };

        Ok(Self {
            chain: None,
            scene,
            sync,
            set_layout,
            command_pool,
            vertex_spirv,
            fragment_spirv,
            clear_color: config.graphics.clear_color,
            polygon_mode,
            window,
            device,
        })
    }

    fn chain(&self) -> Result<&ChainResources> {
        self.chain.as_ref().context("Swapchain not initialized")
    }

    fn create_pipeline(
        &self,
        render_pass: &RenderPass,
        layout: &PipelineLayout,
        extent: vk::Extent2D,
    ) -> Result<Pipeline> {
        // Modules are only needed while the pipeline is compiled
        let vertex = ShaderModule::new(&self.device, &self.vertex_spirv)?;
        let fragment = ShaderModule::new(&self.device, &self.fragment_spirv)?;

        PipelineBuilder::new(&vertex, &fragment)
            .extent(extent)
            .polygon_mode(self.polygon_mode)
            .build(&self.device, render_pass, layout)
    }
}

impl FrameBackend for VulkanBackend {
    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn query_surface(&mut self) -> Result<SwapchainSupport> {
        self.device.query_surface()
    }

    fn queue_families(&self) -> QueueFamilies {
        self.device.queue_families
    }

    fn build_chain(&mut self, plan: &SwapchainPlan) -> Result<usize> {
        let device = &self.device;

        // Swapchain, image views, depth
        let swapchain = Swapchain::new(device.clone(), plan)?;
        let image_count = swapchain.image_count();
        let depth_format = buffer::find_depth_format(device)?;
        let depth = Image::depth(device, depth_format, swapchain.extent)?;

        // Descriptor infrastructure, one set per object per image
        let descriptor_pool =
            DescriptorPool::new(device, (self.scene.object_count() * image_count) as u32)?;
        self.scene
            .prepare_slots(device, &descriptor_pool, &self.set_layout, image_count)?;

        // Pipeline layout, render pass, pipeline, framebuffers
        let pipeline_layout = PipelineLayout::new(device, &[&self.set_layout])?;
        let render_pass = RenderPass::new(device, swapchain.format, depth_format)?;
        let pipeline = self.create_pipeline(&render_pass, &pipeline_layout, swapchain.extent)?;
        let framebuffers = Framebuffers::new(
            device,
            &render_pass,
            &swapchain.image_views,
            depth.view,
            swapchain.extent,
        )?;

        // Command buffers and per-image fences
        let command_buffers = self.command_pool.allocate(image_count as u32)?;
        let fences = (0..image_count)
            .map(|_| Fence::signaled(device))
            .collect::<Result<Vec<_>>>()?;

        self.chain = Some(ChainResources {
            framebuffers,
            pipeline,
            render_pass,
            pipeline_layout,
            command_buffers,
            fences,
            _descriptor_pool: descriptor_pool,
            _depth: depth,
            swapchain,
        });

        Ok(image_count)
    }

    fn destroy_chain(&mut self) {
        if self.chain.take().is_some() {
            self.scene.release_slots();
        }
    }

    fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
        let chain = self.chain()?;
        chain.swapchain.acquire_next_image(self.sync.image_available)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.chain()?.fence(slot)?.wait_and_reset()
    }

    fn record_slot(&mut self, slot: usize, extent: vk::Extent2D) -> Result<()> {
        let chain = self.chain()?;
        let device = &self.device.device;
        let cmd = chain.command_buffers.get(slot)?;
        let framebuffer = chain.framebuffers.get(slot)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(chain.render_pass.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())
                .context("Failed to begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, chain.pipeline.handle);
        }

        self.scene
            .record(device, cmd, chain.pipeline_layout.handle, slot, extent)?;

        unsafe {
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        Ok(())
    }

    fn submit_slot(&mut self, slot: usize) -> Result<()> {
        let chain = self.chain()?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [chain.command_buffers.get(slot)?];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                chain.fence(slot)?.handle,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize) -> Result<PresentOutcome> {
        let chain = self.chain()?;
        chain
            .swapchain
            .present(slot as u32, self.sync.render_finished)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Nothing may be in flight when the wrappers below release handles
        if let Err(e) = self.device.wait_idle() {
            log::error!("{:#}", e);
        }
        self.destroy_chain();
    }
}
