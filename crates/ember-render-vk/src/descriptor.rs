// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{ResultExt, VkResult};
use crate::gpu::Gpu;

pub const VIEW_PROJECTION_BINDING: u32 = 0;
pub const MODEL_BINDING: u32 = 1;
pub const TEXTURE_BINDING: u32 = 0;

/// Set 0: camera block plus the per-object block addressed by dynamic offset.
pub fn create_uniform_set_layout<G: Gpu + ?Sized>(gpu: &G) -> VkResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: VIEW_PROJECTION_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: MODEL_BINDING,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
    ];
    gpu.create_descriptor_set_layout(&bindings)
        .creating("create_descriptor_set_layout(uniforms)")
}

/// Set 1: one combined image sampler read by the fragment stage.
pub fn create_sampler_set_layout<G: Gpu + ?Sized>(gpu: &G) -> VkResult<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: TEXTURE_BINDING,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    };
    gpu.create_descriptor_set_layout(std::slice::from_ref(&binding))
        .creating("create_descriptor_set_layout(sampler)")
}

/// Pool sized for `sets` uniform sets, each with one plain and one dynamic buffer.
pub fn create_uniform_pool<G: Gpu + ?Sized>(gpu: &G, sets: u32) -> VkResult<vk::DescriptorPool> {
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: sets,
        },
    ];
    gpu.create_descriptor_pool(sets, &sizes)
        .creating("create_descriptor_pool(uniforms)")
}

pub fn create_sampler_pool<G: Gpu + ?Sized>(gpu: &G, sets: u32) -> VkResult<vk::DescriptorPool> {
    let size = vk::DescriptorPoolSize {
        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: sets,
    };
    gpu.create_descriptor_pool(sets, std::slice::from_ref(&size))
        .creating("create_descriptor_pool(sampler)")
}
