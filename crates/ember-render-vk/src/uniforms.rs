// SPDX-License-Identifier: CEPL-1.0
use std::marker::PhantomData;
use std::mem::size_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::descriptor::{create_uniform_pool, MODEL_BINDING, VIEW_PROJECTION_BINDING};
use crate::error::{ResultExt, VkResult};
use crate::gpu::Gpu;
use crate::memory::{aligned_stride, GpuBuffer};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
}

impl ViewProjection {
    pub fn new(projection: Mat4, view: Mat4) -> Self {
        Self {
            projection: projection.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
        }
    }
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectTransform {
    pub model: [[f32; 4]; 4],
}

impl From<Mat4> for ObjectTransform {
    fn from(m: Mat4) -> Self {
        Self {
            model: m.to_cols_array_2d(),
        }
    }
}

/// `count` values of `T` laid out `stride` bytes apart, ready to copy into a
/// dynamic uniform buffer as-is.
#[derive(Clone, Debug)]
pub struct StridedBlocks<T> {
    bytes: Vec<u8>,
    stride: usize,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T> Default for StridedBlocks<T> {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            stride: 0,
            count: 0,
            _marker: PhantomData,
        }
    }
}

impl<T: Pod> StridedBlocks<T> {
    pub fn new(count: usize, min_alignment: vk::DeviceSize) -> Self {
        let stride = aligned_stride(size_of::<T>() as vk::DeviceSize, min_alignment) as usize;
        Self {
            bytes: vec![0; stride * count],
            stride,
            count,
            _marker: PhantomData,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn offset(&self, index: usize) -> u32 {
        (index * self.stride) as u32
    }

    /// Panics if `index >= count`.
    pub fn set(&mut self, index: usize, value: &T) {
        let start = index * self.stride;
        self.bytes[start..start + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
    }

    pub fn get(&self, index: usize) -> T {
        let start = index * self.stride;
        bytemuck::pod_read_unaligned(&self.bytes[start..start + size_of::<T>()])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes covering the first `blocks` entries.
    pub fn prefix(&self, blocks: usize) -> &[u8] {
        &self.bytes[..blocks.min(self.count) * self.stride]
    }
}

/// Buffers and descriptor set owned by one frame-in-flight slot.
#[derive(Debug)]
pub struct SlotUniforms {
    pub view_projection: GpuBuffer,
    pub objects: GpuBuffer,
    pub set: vk::DescriptorSet,
}

#[derive(Default)]
pub struct FrameUniforms {
    slots: Vec<SlotUniforms>,
    pool: vk::DescriptorPool,
    packed: StridedBlocks<ObjectTransform>,
}

impl FrameUniforms {
    /// Allocates uniform buffers and a set per slot and points the set at them.
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        layout: vk::DescriptorSetLayout,
        slot_count: usize,
        max_objects: usize,
    ) -> VkResult<Self> {
        let packed = StridedBlocks::new(max_objects, gpu.min_uniform_offset_alignment());
        let pool = create_uniform_pool(gpu, slot_count as u32)?;
        let mut uniforms = Self {
            slots: Vec::with_capacity(slot_count),
            pool,
            packed,
        };

        if let Err(e) = uniforms.allocate(gpu, layout, slot_count) {
            uniforms.destroy(gpu);
            return Err(e);
        }
        Ok(uniforms)
    }

    fn allocate<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        layout: vk::DescriptorSetLayout,
        slot_count: usize,
    ) -> VkResult<()> {
        let layouts = vec![layout; slot_count];
        let sets = gpu
            .allocate_descriptor_sets(self.pool, &layouts)
            .creating("allocate_descriptor_sets(uniforms)")?;

        let vp_size = size_of::<ViewProjection>() as vk::DeviceSize;
        let objects_size = self.packed.as_bytes().len().max(self.packed.stride()) as vk::DeviceSize;

        for set in sets {
            let view_projection =
                GpuBuffer::host_visible(gpu, vp_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
            let objects =
                match GpuBuffer::host_visible(gpu, objects_size, vk::BufferUsageFlags::UNIFORM_BUFFER) {
                    Ok(b) => b,
                    Err(e) => {
                        view_projection.destroy(gpu);
                        return Err(e);
                    }
                };

            gpu.write_buffer_descriptor(
                set,
                VIEW_PROJECTION_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                view_projection.buffer,
                vp_size,
            );
            gpu.write_buffer_descriptor(
                set,
                MODEL_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                objects.buffer,
                self.packed.stride() as vk::DeviceSize,
            );

            self.slots.push(SlotUniforms {
                view_projection,
                objects,
                set,
            });
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.packed.count()
    }

    pub fn stride(&self) -> usize {
        self.packed.stride()
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.slots[slot].set
    }

    pub fn dynamic_offset(&self, object: usize) -> u32 {
        self.packed.offset(object)
    }

    pub fn slot(&self, slot: usize) -> &SlotUniforms {
        &self.slots[slot]
    }

    /// Writes the camera block and the packed object transforms of `slot`.
    /// The caller must have waited on the slot's fence. Returns the number of
    /// transforms written.
    pub fn write<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        slot: usize,
        view_projection: &ViewProjection,
        transforms: impl IntoIterator<Item = Mat4>,
    ) -> VkResult<usize> {
        let mut written = 0;
        for (i, m) in transforms.into_iter().take(self.packed.count()).enumerate() {
            self.packed.set(i, &ObjectTransform::from(m));
            written = i + 1;
        }

        let target = &self.slots[slot];
        target
            .view_projection
            .write(gpu, 0, bytemuck::bytes_of(view_projection))?;
        if written > 0 {
            target.objects.write(gpu, 0, self.packed.prefix(written))?;
        }
        Ok(written)
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        for slot in self.slots.drain(..) {
            slot.view_projection.destroy(gpu);
            slot.objects.destroy(gpu);
        }
        if self.pool != vk::DescriptorPool::null() {
            gpu.destroy_descriptor_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
        }
    }
}
