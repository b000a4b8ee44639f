// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::ImageData;
use tracing::debug;

use crate::descriptor::{create_sampler_pool, create_sampler_set_layout, TEXTURE_BINDING};
use crate::error::{ResultExt, VkError, VkResult};
use crate::gpu::{Gpu, ImageDesc};
use crate::memory::{one_shot, GpuBuffer, GpuImage};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

impl TextureId {
    /// 1x1 white texture bound for meshes without a material.
    pub const WHITE: TextureId = TextureId(0);
}

struct Texture {
    image: GpuImage,
    set: vk::DescriptorSet,
}

/// Sampled RGBA8 textures, each with its own descriptor set for set 1.
#[derive(Default)]
pub struct TextureStore {
    textures: Vec<Texture>,
    sampler: vk::Sampler,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    capacity: usize,
}

impl TextureStore {
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        pool: vk::CommandPool,
        capacity: usize,
    ) -> VkResult<Self> {
        let capacity = capacity.max(1);
        let layout = create_sampler_set_layout(gpu)?;
        let mut store = Self {
            textures: Vec::with_capacity(capacity),
            sampler: vk::Sampler::null(),
            layout,
            pool: vk::DescriptorPool::null(),
            capacity,
        };

        let setup = (|| {
            store.pool = create_sampler_pool(gpu, capacity as u32)?;
            store.sampler = gpu.create_sampler().creating("create_sampler")?;
            store.create(gpu, pool, &ImageData::solid([255; 4]))
        })();
        if let Err(e) = setup {
            store.destroy(gpu);
            return Err(e);
        }
        Ok(store)
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Descriptor set for `id`, falling back to the white texture.
    pub fn set(&self, id: TextureId) -> vk::DescriptorSet {
        self.textures
            .get(id.0)
            .or_else(|| self.textures.first())
            .map_or(vk::DescriptorSet::null(), |t| t.set)
    }

    /// Uploads `image` and returns its id.
    pub fn create<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        pool: vk::CommandPool,
        image: &ImageData,
    ) -> VkResult<TextureId> {
        if self.textures.len() >= self.capacity {
            return Err(VkError::TextureCapacity {
                capacity: self.capacity,
            });
        }
        let expected = image.width as u64 * image.height as u64 * 4;
        if expected == 0 || image.rgba.len() as u64 != expected {
            return Err(VkError::InvalidImage {
                width: image.width,
                height: image.height,
                expected,
                len: image.rgba.len(),
            });
        }
        let extent = vk::Extent2D {
            width: image.width,
            height: image.height,
        };

        let staging = GpuBuffer::host_visible(
            gpu,
            image.rgba.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let target = GpuImage::new(
            gpu,
            &ImageDesc {
                extent,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            vk::ImageAspectFlags::COLOR,
        );
        let target = match target {
            Ok(t) => t,
            Err(e) => {
                staging.destroy(gpu);
                return Err(e);
            }
        };

        let uploaded = staging.write(gpu, 0, &image.rgba).and_then(|()| {
            one_shot(gpu, pool, |cmd| {
                gpu.cmd_transition_image(
                    cmd,
                    target.image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                gpu.cmd_copy_buffer_to_image(cmd, staging.buffer, target.image, extent);
                gpu.cmd_transition_image(
                    cmd,
                    target.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })
        });
        staging.destroy(gpu);

        let set = uploaded.and_then(|()| {
            gpu.allocate_descriptor_sets(self.pool, std::slice::from_ref(&self.layout))
                .creating("allocate_descriptor_sets(texture)")
        });
        let set = match set {
            Ok(sets) => sets[0],
            Err(e) => {
                target.destroy(gpu);
                return Err(e);
            }
        };
        gpu.write_image_descriptor(set, TEXTURE_BINDING, target.view, self.sampler);

        let id = TextureId(self.textures.len());
        debug!("texture {} uploaded ({}x{})", id.0, image.width, image.height);
        self.textures.push(Texture { image: target, set });
        Ok(id)
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for texture in self.textures.drain(..) {
            texture.image.destroy(gpu);
        }
        if self.pool != vk::DescriptorPool::null() {
            gpu.destroy_descriptor_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
        }
        if self.sampler != vk::Sampler::null() {
            gpu.destroy_sampler(self.sampler);
            self.sampler = vk::Sampler::null();
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            gpu.destroy_descriptor_set_layout(self.layout);
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}
