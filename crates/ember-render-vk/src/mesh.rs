// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::{ModelId, Vertex};
use glam::Mat4;

use crate::error::{VkError, VkResult};
use crate::gpu::Gpu;
use crate::memory::GpuBuffer;
use crate::texture::TextureId;

/// Device-local vertex and index buffers of one primitive.
#[derive(Debug)]
pub struct Mesh {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
    texture: TextureId,
}

impl Mesh {
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        pool: vk::CommandPool,
        vertices: &[Vertex],
        indices: &[u32],
        texture: TextureId,
    ) -> VkResult<Self> {
        let vbuf = GpuBuffer::device_local_with(
            gpu,
            pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )?;
        let ibuf = match GpuBuffer::device_local_with(
            gpu,
            pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        ) {
            Ok(b) => b,
            Err(e) => {
                vbuf.destroy(gpu);
                return Err(e);
            }
        };

        Ok(Self {
            vertices: vbuf,
            indices: ibuf,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            texture,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.buffer
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        self.indices.destroy(gpu);
        self.vertices.destroy(gpu);
    }
}

/// Meshes drawn with one shared transform.
#[derive(Debug)]
pub struct Model {
    meshes: Vec<Mesh>,
    transform: Mat4,
}

impl Model {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self {
            meshes,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for mesh in self.meshes.drain(..) {
            mesh.destroy(gpu);
        }
    }
}

/// Models in object-id order. The id is also the model's uniform block index.
#[derive(Debug)]
pub struct Scene {
    models: Vec<Model>,
    capacity: usize,
}

impl Scene {
    pub fn new(capacity: usize) -> Self {
        Self {
            models: Vec::new(),
            capacity,
        }
    }

    /// Hands `model` back when the scene is full so its buffers can be released.
    pub fn add(&mut self, model: Model) -> Result<ModelId, (Model, VkError)> {
        if self.models.len() >= self.capacity {
            let capacity = self.capacity;
            return Err((model, VkError::SceneFull { capacity }));
        }
        self.models.push(model);
        Ok(ModelId(self.models.len() - 1))
    }

    pub fn set_transform(&mut self, id: ModelId, transform: Mat4) -> VkResult<()> {
        let model = self
            .models
            .get_mut(id.0)
            .ok_or(VkError::UnknownModel(id.0))?;
        model.set_transform(transform);
        Ok(())
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.models.iter().enumerate().map(|(i, m)| (ModelId(i), m))
    }

    pub fn transforms(&self) -> impl Iterator<Item = Mat4> + '_ {
        self.models.iter().map(Model::transform)
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for mut model in self.models.drain(..) {
            model.destroy(gpu);
        }
    }
}
