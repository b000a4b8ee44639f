// SPDX-License-Identifier: CEPL-1.0
//! Device operations used by the resource, uniform and frame code.
//!
//! Everything above the device layer talks to Vulkan through [`Gpu`] so the
//! resource lifecycle and frame ordering can be exercised without a driver.
//! Handles are plain values; the implementor owns the unsafe calls.

use ash::vk;

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

impl Submission {
    pub fn commands(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait: None,
            signal: None,
        }
    }
}

pub trait Gpu {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;
    fn min_uniform_offset_alignment(&self) -> vk::DeviceSize;
    fn graphics_queue(&self) -> vk::Queue;
    fn present_queue(&self) -> vk::Queue;

    // buffers and memory
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<vk::Buffer, vk::Result>;
    fn buffer_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        type_index: u32,
    ) -> Result<vk::DeviceMemory, vk::Result>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Copies `bytes` into host-visible, coherent memory.
    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> Result<(), vk::Result>;

    // images
    fn create_image(&self, desc: &ImageDesc) -> Result<vk::Image, vk::Result>;
    fn image_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView, vk::Result>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self) -> Result<vk::Sampler, vk::Result>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // command buffers
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result>;
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result>;
    fn end_commands(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result>;
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    );
    /// Color-aspect layout transition for texture uploads.
    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    );
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_geometry(&self, cmd: vk::CommandBuffer, vertices: vk::Buffer, indices: vk::Buffer);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);

    // synchronization
    fn create_semaphore(&self) -> Result<vk::Semaphore, vk::Result>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, vk::Result>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<(), vk::Result>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;

    // queues
    fn submit(
        &self,
        queue: vk::Queue,
        submission: &Submission,
        fence: vk::Fence,
    ) -> Result<(), vk::Result>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> Result<(), vk::Result>;
    fn device_wait_idle(&self) -> Result<(), vk::Result>;
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout: u64,
    ) -> Result<(u32, bool), vk::Result>;
    /// Returns whether the swapchain is suboptimal.
    fn present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    // descriptors
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<vk::DescriptorSetLayout, vk::Result>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool, vk::Result>;
    /// Also releases every set allocated from the pool.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result>;
    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    );
    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    );
}
