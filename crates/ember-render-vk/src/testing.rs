// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Gpu`] that hands out fake handles, keeps host-visible memory as
//! byte vectors and records every call in order.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};

use ash::vk::{self, Handle};

use crate::gpu::{Gpu, ImageDesc, RenderPassBegin, Submission};

pub(crate) const UBO_ALIGNMENT: vk::DeviceSize = 256;
pub(crate) const DEVICE_LOCAL_TYPE: u32 = 0;
pub(crate) const HOST_VISIBLE_TYPE: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    CreateBuffer {
        buffer: u64,
        size: u64,
        usage: vk::BufferUsageFlags,
    },
    AllocateMemory {
        memory: u64,
        type_index: u32,
    },
    WriteMemory {
        memory: u64,
        offset: u64,
        len: usize,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: u64,
        image: u64,
    },
    Transition {
        image: u64,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    ResetCommands(u64),
    BeginCommands(u64),
    EndCommands(u64),
    BeginRenderPass {
        framebuffer: u64,
        clear: [f32; 4],
    },
    EndRenderPass,
    BindPipeline(u64),
    SetViewport {
        width: u32,
        height: u32,
    },
    BindGeometry {
        vertices: u64,
        indices: u64,
    },
    BindSets {
        sets: Vec<u64>,
        offsets: Vec<u32>,
    },
    DrawIndexed(u32),
    WaitFence(u64),
    ResetFence(u64),
    Submit {
        queue: u64,
        cmd: u64,
        wait: Option<u64>,
        signal: Option<u64>,
        fence: u64,
    },
    QueueWaitIdle(u64),
    DeviceWaitIdle,
    Acquire {
        signal: u64,
    },
    Present {
        image_index: u32,
        wait: u64,
    },
    WriteBufferDescriptor {
        set: u64,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: u64,
        range: u64,
    },
    WriteImageDescriptor {
        set: u64,
        binding: u32,
        view: u64,
    },
}

pub(crate) struct RecordingGpu {
    next: Cell<u64>,
    live: RefCell<BTreeMap<u64, &'static str>>,
    calls: RefCell<Vec<Call>>,
    sizes: RefCell<HashMap<u64, u64>>,
    memory: RefCell<HashMap<u64, Vec<u8>>>,
    pools: RefCell<HashMap<u64, (u32, u32)>>,
    failures: RefCell<HashMap<&'static str, (u32, vk::Result)>>,
    acquire_script: RefCell<VecDeque<Result<(u32, bool), vk::Result>>>,
    present_script: RefCell<VecDeque<Result<bool, vk::Result>>>,
    next_image: Cell<u32>,
    image_count: u32,
    type_bits: Cell<u32>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl RecordingGpu {
    pub fn new() -> Self {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 2;
        props.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[HOST_VISIBLE_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        Self {
            next: Cell::new(0x1000),
            live: RefCell::default(),
            calls: RefCell::default(),
            sizes: RefCell::default(),
            memory: RefCell::default(),
            pools: RefCell::default(),
            failures: RefCell::default(),
            acquire_script: RefCell::default(),
            present_script: RefCell::default(),
            next_image: Cell::new(0),
            image_count: 3,
            type_bits: Cell::new(0b11),
            memory_properties: props,
        }
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        vk::CommandPool::from_raw(0xC0)
    }

    /// Makes the next call of `op` fail with `result`.
    pub fn fail_next(&self, op: &'static str, result: vk::Result) {
        self.fail_nth(op, 0, result);
    }

    /// Lets `skip` calls of `op` succeed, then fails the next one.
    pub fn fail_nth(&self, op: &'static str, skip: u32, result: vk::Result) {
        self.failures.borrow_mut().insert(op, (skip, result));
    }

    pub fn set_type_bits(&self, bits: u32) {
        self.type_bits.set(bits);
    }

    pub fn script_acquire(&self, result: Result<(u32, bool), vk::Result>) {
        self.acquire_script.borrow_mut().push_back(result);
    }

    pub fn script_present(&self, result: Result<bool, vk::Result>) {
        self.present_script.borrow_mut().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_of(&self, kind: &str) -> usize {
        self.live.borrow().values().filter(|k| **k == kind).count()
    }

    pub fn memory_bytes(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.memory
            .borrow()
            .get(&memory.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, op: &'static str) -> Result<(), vk::Result> {
        let mut failures = self.failures.borrow_mut();
        match failures.get_mut(op) {
            Some((0, result)) => {
                let result = *result;
                failures.remove(op);
                Err(result)
            }
            Some((skip, _)) => {
                *skip -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn mint(&self, kind: &'static str) -> u64 {
        let raw = self.next.get();
        self.next.set(raw + 1);
        self.live.borrow_mut().insert(raw, kind);
        raw
    }

    fn release(&self, raw: u64, kind: &'static str) {
        let removed = self.live.borrow_mut().remove(&raw);
        assert_eq!(removed, Some(kind), "release of {kind} {raw:#x} that is not live");
    }
}

impl Gpu for RecordingGpu {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn min_uniform_offset_alignment(&self) -> vk::DeviceSize {
        UBO_ALIGNMENT
    }

    fn graphics_queue(&self) -> vk::Queue {
        vk::Queue::from_raw(0x0A)
    }

    fn present_queue(&self) -> vk::Queue {
        vk::Queue::from_raw(0x0B)
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, vk::Result> {
        self.check("create_buffer")?;
        let buffer = self.mint("buffer");
        self.sizes.borrow_mut().insert(buffer, size);
        self.record(Call::CreateBuffer {
            buffer,
            size,
            usage,
        });
        Ok(vk::Buffer::from_raw(buffer))
    }

    fn buffer_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.sizes.borrow()[&buffer.as_raw()],
            alignment: 16,
            memory_type_bits: self.type_bits.get(),
        }
    }

    fn bind_buffer_memory(
        &self,
        _buffer: vk::Buffer,
        _memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result> {
        self.check("bind_buffer_memory")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.release(buffer.as_raw(), "buffer");
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        type_index: u32,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        self.check("allocate_memory")?;
        let memory = self.mint("memory");
        self.memory
            .borrow_mut()
            .insert(memory, vec![0; size as usize]);
        self.record(Call::AllocateMemory { memory, type_index });
        Ok(vk::DeviceMemory::from_raw(memory))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.release(memory.as_raw(), "memory");
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> Result<(), vk::Result> {
        self.check("write_memory")?;
        let mut all = self.memory.borrow_mut();
        let dst = all
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let start = offset as usize;
        dst[start..start + bytes.len()].copy_from_slice(bytes);
        drop(all);
        self.record(Call::WriteMemory {
            memory: memory.as_raw(),
            offset,
            len: bytes.len(),
        });
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<vk::Image, vk::Result> {
        self.check("create_image")?;
        let image = self.mint("image");
        let size = desc.extent.width as u64 * desc.extent.height as u64 * 4;
        self.sizes.borrow_mut().insert(image, size);
        Ok(vk::Image::from_raw(image))
    }

    fn image_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.sizes.borrow()[&image.as_raw()],
            alignment: 256,
            memory_type_bits: self.type_bits.get(),
        }
    }

    fn bind_image_memory(
        &self,
        _image: vk::Image,
        _memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result> {
        self.check("bind_image_memory")
    }

    fn destroy_image(&self, image: vk::Image) {
        self.release(image.as_raw(), "image");
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView, vk::Result> {
        self.check("create_image_view")?;
        Ok(vk::ImageView::from_raw(self.mint("image_view")))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view.as_raw(), "image_view");
    }

    fn create_sampler(&self) -> Result<vk::Sampler, vk::Result> {
        self.check("create_sampler")?;
        Ok(vk::Sampler::from_raw(self.mint("sampler")))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.release(sampler.as_raw(), "sampler");
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        self.check("allocate_command_buffers")?;
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.mint("command_buffer")))
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for cmd in buffers {
            self.release(cmd.as_raw(), "command_buffer");
        }
    }

    fn reset_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        self.record(Call::ResetCommands(cmd.as_raw()));
        Ok(())
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        self.check("begin_commands")?;
        self.record(Call::BeginCommands(cmd.as_raw()));
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        self.record(Call::EndCommands(cmd.as_raw()));
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(Call::CopyBuffer {
            src: src.as_raw(),
            dst: dst.as_raw(),
            size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        _extent: vk::Extent2D,
    ) {
        self.record(Call::CopyBufferToImage {
            src: src.as_raw(),
            image: image.as_raw(),
        });
    }

    fn cmd_transition_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        self.record(Call::Transition {
            image: image.as_raw(),
            from,
            to,
        });
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.record(Call::BeginRenderPass {
            framebuffer: begin.framebuffer.as_raw(),
            clear: begin.clear_color,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(pipeline.as_raw()));
    }

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Call::SetViewport {
            width: extent.width,
            height: extent.height,
        });
    }

    fn cmd_bind_geometry(&self, _cmd: vk::CommandBuffer, vertices: vk::Buffer, indices: vk::Buffer) {
        self.record(Call::BindGeometry {
            vertices: vertices.as_raw(),
            indices: indices.as_raw(),
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.record(Call::BindSets {
            sets: sets.iter().map(|s| s.as_raw()).collect(),
            offsets: dynamic_offsets.to_vec(),
        });
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32) {
        self.record(Call::DrawIndexed(index_count));
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result> {
        self.check("create_semaphore")?;
        Ok(vk::Semaphore::from_raw(self.mint("semaphore")))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore.as_raw(), "semaphore");
    }

    fn create_fence(&self, _signaled: bool) -> Result<vk::Fence, vk::Result> {
        self.check("create_fence")?;
        Ok(vk::Fence::from_raw(self.mint("fence")))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.release(fence.as_raw(), "fence");
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> Result<(), vk::Result> {
        self.check("wait_for_fence")?;
        self.record(Call::WaitFence(fence.as_raw()));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        self.record(Call::ResetFence(fence.as_raw()));
        Ok(())
    }

    fn submit(
        &self,
        queue: vk::Queue,
        submission: &Submission,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        self.check("submit")?;
        self.record(Call::Submit {
            queue: queue.as_raw(),
            cmd: submission.command_buffer.as_raw(),
            wait: submission.wait.map(|(s, _)| s.as_raw()),
            signal: submission.signal.map(|s| s.as_raw()),
            fence: fence.as_raw(),
        });
        Ok(())
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), vk::Result> {
        self.record(Call::QueueWaitIdle(queue.as_raw()));
        Ok(())
    }

    fn device_wait_idle(&self) -> Result<(), vk::Result> {
        self.record(Call::DeviceWaitIdle);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        _timeout: u64,
    ) -> Result<(u32, bool), vk::Result> {
        self.record(Call::Acquire {
            signal: signal.as_raw(),
        });
        if let Some(scripted) = self.acquire_script.borrow_mut().pop_front() {
            return scripted;
        }
        let index = self.next_image.get();
        self.next_image.set((index + 1) % self.image_count);
        Ok((index, false))
    }

    fn present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        self.record(Call::Present {
            image_index,
            wait: wait.as_raw(),
        });
        self.present_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<vk::DescriptorSetLayout, vk::Result> {
        self.check("create_descriptor_set_layout")?;
        Ok(vk::DescriptorSetLayout::from_raw(
            self.mint("descriptor_set_layout"),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout.as_raw(), "descriptor_set_layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, vk::Result> {
        self.check("create_descriptor_pool")?;
        let pool = self.mint("descriptor_pool");
        self.pools.borrow_mut().insert(pool, (max_sets, 0));
        Ok(vk::DescriptorPool::from_raw(pool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.pools.borrow_mut().remove(&pool.as_raw());
        self.release(pool.as_raw(), "descriptor_pool");
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let mut pools = self.pools.borrow_mut();
        let (max, used) = pools
            .get_mut(&pool.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if *used + layouts.len() as u32 > *max {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        *used += layouts.len() as u32;
        drop(pools);

        Ok(layouts
            .iter()
            .map(|_| {
                let raw = self.next.get();
                self.next.set(raw + 1);
                vk::DescriptorSet::from_raw(raw)
            })
            .collect())
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) {
        self.record(Call::WriteBufferDescriptor {
            set: set.as_raw(),
            binding,
            ty,
            buffer: buffer.as_raw(),
            range,
        });
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        _sampler: vk::Sampler,
    ) {
        self.record(Call::WriteImageDescriptor {
            set: set.as_raw(),
            binding,
            view: view.as_raw(),
        });
    }
}
