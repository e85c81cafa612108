// Scene objects
//
// Geometry and textures are uploaded once. Uniform buffers and descriptor
// sets exist per swapchain image and are rebuilt with the chain, because
// the image count may change on recreate.

pub mod transform;

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::Buffer;
use crate::backend::commands::Uploader;
use crate::backend::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::backend::texture::Texture;
use crate::backend::RenderDevice;
use crate::config::{ObjectConfig, ObjectKind};
use crate::mesh::Mesh;

pub use transform::{Camera, Mvp, Transform};

/// Uniform buffer and descriptor set for one swapchain image
struct ObjectSlot {
    uniform: Buffer,
    descriptor_set: vk::DescriptorSet,
}

/// GPU-resident mesh with its transform and texture
pub struct MeshObject {
    slots: Vec<ObjectSlot>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    texture: Arc<Texture>,
    pub transform: Transform,
}

impl MeshObject {
    pub fn new(
        device: &Arc<RenderDevice>,
        uploader: &Uploader,
        mesh: &Mesh,
        transform: Transform,
        texture: Arc<Texture>,
    ) -> Result<Self> {
        if mesh.indices.is_empty() {
            anyhow::bail!("Mesh has no triangles");
        }

        let vertex_buffer = Buffer::device_local(
            device,
            uploader,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = Buffer::device_local(
            device,
            uploader,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        Ok(Self {
            slots: Vec::new(),
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            texture,
            transform,
        })
    }

    fn prepare_slots(
        &mut self,
        device: &Arc<RenderDevice>,
        pool: &DescriptorPool,
        layout: &DescriptorSetLayout,
        image_count: usize,
    ) -> Result<()> {
        let sets = pool.allocate(layout, image_count)?;
        let mut slots = Vec::with_capacity(image_count);

        for descriptor_set in sets {
            let uniform = Buffer::host_visible(
                device,
                std::mem::size_of::<Mvp>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;
            pool.write_object_set(descriptor_set, &uniform, &self.texture);
            slots.push(ObjectSlot {
                uniform,
                descriptor_set,
            });
        }

        self.slots = slots;
        Ok(())
    }

    fn slot(&self, slot: usize) -> Result<&ObjectSlot> {
        self.slots
            .get(slot)
            .with_context(|| format!("Object has no resources for image {}", slot))
    }

    /// Map, copy, unmap the matrix block for `slot`
    fn write_uniforms(&self, slot: usize, mvp: &Mvp) -> Result<()> {
        self.slot(slot)?.uniform.write(bytemuck::bytes_of(mvp))
    }

    fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        slot: usize,
    ) -> Result<()> {
        let descriptor_set = self.slot(slot)?.descriptor_set;

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }

        Ok(())
    }
}

pub enum SceneObject {
    /// Textured mesh spinning about +Z with elapsed time
    StaticMesh(MeshObject),
    /// Untextured light marker, spinning like the rest
    LitMesh(MeshObject),
}

impl SceneObject {
    fn mesh(&self) -> &MeshObject {
        match self {
            Self::StaticMesh(mesh) | Self::LitMesh(mesh) => mesh,
        }
    }

    fn mesh_mut(&mut self) -> &mut MeshObject {
        match self {
            Self::StaticMesh(mesh) | Self::LitMesh(mesh) => mesh,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::StaticMesh(_) => ObjectKind::Static,
            Self::LitMesh(_) => ObjectKind::Lit,
        }
    }

    pub fn model_matrix(&self, elapsed_seconds: f32) -> Mat4 {
        transform::model_for(self.kind(), &self.mesh().transform, elapsed_seconds)
    }

    /// Rewrite this object's uniforms for `slot`
    pub fn update(
        &self,
        slot: usize,
        camera: &Camera,
        extent: vk::Extent2D,
        elapsed_seconds: f32,
    ) -> Result<()> {
        let mvp = Mvp::new(self.model_matrix(elapsed_seconds), camera, extent);
        self.mesh().write_uniforms(slot, &mvp)
    }

    pub fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        slot: usize,
    ) -> Result<()> {
        self.mesh().draw(device, cmd, pipeline_layout, slot)
    }
}

pub struct Scene {
    objects: Vec<SceneObject>,
    pub camera: Camera,
    start: Instant,
}

impl Scene {
    /// Upload every configured object, sharing textures by path
    pub fn load(
        device: &Arc<RenderDevice>,
        uploader: &Uploader,
        configs: &[ObjectConfig],
    ) -> Result<Self> {
        let white = Arc::new(Texture::white(device, uploader)?);
        let mut textures: HashMap<PathBuf, Arc<Texture>> = HashMap::new();
        let mut objects = Vec::with_capacity(configs.len());

        for config in configs {
            let mesh = Mesh::from_source(&config.mesh)?;
            let texture = match (&config.texture, config.kind) {
                (Some(path), ObjectKind::Static) => match textures.get(path) {
                    Some(texture) => texture.clone(),
                    None => {
                        let texture = Arc::new(Texture::load(device, uploader, path)?);
                        textures.insert(path.clone(), texture.clone());
                        texture
                    }
                },
                _ => white.clone(),
            };
            let transform = Transform {
                translate: Vec3::from(config.translate),
                scale: config.scale,
            };

            let object = MeshObject::new(device, uploader, &mesh, transform, texture)
                .with_context(|| format!("Failed to create object from {:?}", config.mesh))?;

            objects.push(match config.kind {
                ObjectKind::Static => SceneObject::StaticMesh(object),
                ObjectKind::Lit => SceneObject::LitMesh(object),
            });
        }

        log::info!("Scene loaded: {} objects", objects.len());

        Ok(Self {
            objects,
            camera: Camera::default(),
            start: Instant::now(),
        })
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Per-image uniforms and descriptor sets for every object
    pub fn prepare_slots(
        &mut self,
        device: &Arc<RenderDevice>,
        pool: &DescriptorPool,
        layout: &DescriptorSetLayout,
        image_count: usize,
    ) -> Result<()> {
        for object in &mut self.objects {
            object.mesh_mut().prepare_slots(device, pool, layout, image_count)?;
        }
        Ok(())
    }

    /// Drop per-image resources; the sets die with their pool
    pub fn release_slots(&mut self) {
        for object in &mut self.objects {
            object.mesh_mut().slots.clear();
        }
    }

    /// Update then draw each object in creation order
    pub fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline_layout: vk::PipelineLayout,
        slot: usize,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let elapsed = self.elapsed_seconds();
        for object in &self.objects {
            object.update(slot, &self.camera, extent, elapsed)?;
            object.draw(device, cmd, pipeline_layout, slot)?;
        }
        Ok(())
    }
}
