// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{ResultExt, VkError, VkResult};
use crate::gpu::{Gpu, ImageDesc, Submission};

pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Smallest memory type index allowed by `type_bits` that has every flag in `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> VkResult<u32> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32))
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(VkError::NoMemoryType {
            type_bits,
            required,
        })
}

/// Rounds `size` up to a multiple of the device's power-of-two offset alignment.
pub fn aligned_stride(size: vk::DeviceSize, min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_alignment <= 1 {
        return size;
    }
    (size + min_alignment - 1) & !(min_alignment - 1)
}

/// A buffer and the memory bound to it.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<Self> {
        let buffer = gpu.create_buffer(size, usage).creating("create_buffer")?;
        match bind_new_memory(gpu, gpu.buffer_requirements(buffer), properties, |memory| {
            gpu.bind_buffer_memory(buffer, memory)
        }) {
            Ok(memory) => Ok(Self {
                buffer,
                memory,
                size,
            }),
            Err(e) => {
                gpu.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    pub fn host_visible<G: Gpu + ?Sized>(
        gpu: &G,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<Self> {
        Self::new(gpu, size, usage, HOST_COHERENT)
    }

    /// Device-local buffer filled from `bytes` through a staging copy.
    pub fn device_local_with<G: Gpu + ?Sized>(
        gpu: &G,
        pool: vk::CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VkResult<Self> {
        let buffer = Self::new(
            gpu,
            bytes.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if let Err(e) = upload_via_staging(gpu, pool, buffer.buffer, bytes) {
            buffer.destroy(gpu);
            return Err(e);
        }
        Ok(buffer)
    }

    pub fn write<G: Gpu + ?Sized>(
        &self,
        gpu: &G,
        offset: vk::DeviceSize,
        bytes: &[u8],
    ) -> VkResult<()> {
        debug_assert!(offset + bytes.len() as vk::DeviceSize <= self.size);
        gpu.write_memory(self.memory, offset, bytes)
            .in_frame("write_memory")
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.destroy_buffer(self.buffer);
        gpu.free_memory(self.memory);
    }
}

/// A 2D image with its memory and a single view.
#[derive(Debug)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl GpuImage {
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        desc: &ImageDesc,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<Self> {
        let image = gpu.create_image(desc).creating("create_image")?;
        let memory = match bind_new_memory(
            gpu,
            gpu.image_requirements(image),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            |memory| gpu.bind_image_memory(image, memory),
        ) {
            Ok(memory) => memory,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };
        match gpu
            .create_image_view(image, desc.format, aspect)
            .creating("create_image_view")
        {
            Ok(view) => Ok(Self {
                image,
                memory,
                view,
                format: desc.format,
            }),
            Err(e) => {
                gpu.destroy_image(image);
                gpu.free_memory(memory);
                Err(e)
            }
        }
    }

    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image);
        gpu.free_memory(self.memory);
    }
}

fn bind_new_memory<G: Gpu + ?Sized>(
    gpu: &G,
    req: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    bind: impl FnOnce(vk::DeviceMemory) -> Result<(), vk::Result>,
) -> VkResult<vk::DeviceMemory> {
    let type_index = find_memory_type(gpu.memory_properties(), req.memory_type_bits, properties)?;
    let memory = gpu
        .allocate_memory(req.size, type_index)
        .creating("allocate_memory")?;
    if let Err(e) = bind(memory).creating("bind_memory") {
        gpu.free_memory(memory);
        return Err(e);
    }
    Ok(memory)
}

/// Records `record` into a throwaway command buffer, submits it to the
/// graphics queue and blocks until the queue is idle.
pub fn one_shot<G: Gpu + ?Sized>(
    gpu: &G,
    pool: vk::CommandPool,
    record: impl FnOnce(vk::CommandBuffer),
) -> VkResult<()> {
    let cmds = gpu
        .allocate_command_buffers(pool, 1)
        .creating("allocate_command_buffers")?;
    let cmd = cmds[0];
    let queue = gpu.graphics_queue();

    let result = (|| {
        gpu.begin_commands(cmd).creating("begin_command_buffer")?;
        record(cmd);
        gpu.end_commands(cmd).creating("end_command_buffer")?;
        gpu.submit(queue, &Submission::commands(cmd), vk::Fence::null())
            .creating("queue_submit(upload)")?;
        gpu.queue_wait_idle(queue).creating("queue_wait_idle")
    })();

    gpu.free_command_buffers(pool, &cmds);
    result
}

/// Copies `bytes` into `dst` through a transient host-visible staging buffer.
pub fn upload_via_staging<G: Gpu + ?Sized>(
    gpu: &G,
    pool: vk::CommandPool,
    dst: vk::Buffer,
    bytes: &[u8],
) -> VkResult<()> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = GpuBuffer::host_visible(gpu, size, vk::BufferUsageFlags::TRANSFER_SRC)?;

    let result = staging
        .write(gpu, 0, bytes)
        .and_then(|()| one_shot(gpu, pool, |cmd| gpu.cmd_copy_buffer(cmd, staging.buffer, dst, size)));

    staging.destroy(gpu);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingGpu, DEVICE_LOCAL_TYPE, HOST_VISIBLE_TYPE};
    use ash::vk::Handle;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties::default();
        p.memory_type_count = flags.len() as u32;
        for (i, f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = *f;
        }
        p
    }

    #[test]
    fn memory_type_is_smallest_matching_index() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST_COHERENT,
            HOST_COHERENT | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&p, 0b111, HOST_COHERENT).unwrap(), 1);
        assert_eq!(find_memory_type(&p, 0b100, HOST_COHERENT).unwrap(), 2);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, HOST_COHERENT).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { type_bits: 1, .. }));
    }

    #[test]
    fn stride_is_aligned_and_tight() {
        for shift in 0..9 {
            let align = 1u64 << shift;
            for size in 1..=600u64 {
                let stride = aligned_stride(size, align);
                assert_eq!(stride % align, 0, "size {size} align {align}");
                assert!(stride >= size);
                assert!(stride < size + align);
            }
        }
        assert_eq!(aligned_stride(64, 256), 256);
        assert_eq!(aligned_stride(300, 256), 512);
        assert_eq!(aligned_stride(72, 0), 72);
    }

    #[test]
    fn buffer_uses_requested_memory_kind() {
        let gpu = RecordingGpu::new();
        let buf = GpuBuffer::host_visible(&gpu, 128, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap();
        assert!(gpu.calls().contains(&Call::AllocateMemory {
            memory: buf.memory.as_raw(),
            type_index: HOST_VISIBLE_TYPE,
        }));
        buf.destroy(&gpu);
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn failed_allocation_releases_the_buffer() {
        let gpu = RecordingGpu::new();
        gpu.fail_next("allocate_memory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = GpuBuffer::new(
            &gpu,
            64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap_err();
        assert!(matches!(err, VkError::ResourceCreation { what: "allocate_memory", .. }));
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn no_matching_memory_releases_the_buffer() {
        let gpu = RecordingGpu::new();
        gpu.set_type_bits(1 << DEVICE_LOCAL_TYPE);
        let err = GpuBuffer::host_visible(&gpu, 64, vk::BufferUsageFlags::UNIFORM_BUFFER).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { .. }));
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn staging_upload_copies_then_frees_staging() {
        let gpu = RecordingGpu::new();
        let pool = gpu.command_pool();
        let data = [7u8; 48];
        let dst = GpuBuffer::device_local_with(&gpu, pool, vk::BufferUsageFlags::VERTEX_BUFFER, &data)
            .unwrap();

        let calls = gpu.calls();
        let staging = calls
            .iter()
            .find_map(|c| match c {
                Call::CreateBuffer { buffer, usage, .. }
                    if usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) =>
                {
                    Some(*buffer)
                }
                _ => None,
            })
            .unwrap();
        let copy = calls
            .iter()
            .position(|c| {
                *c == Call::CopyBuffer {
                    src: staging,
                    dst: dst.buffer.as_raw(),
                    size: 48,
                }
            })
            .unwrap();
        let wait = calls
            .iter()
            .position(|c| matches!(c, Call::QueueWaitIdle(_)))
            .unwrap();
        assert!(copy < wait);

        // only the destination buffer and its memory survive
        assert_eq!(gpu.live_count(), 2);
        dst.destroy(&gpu);
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn failed_submit_still_frees_staging_and_command_buffer() {
        let gpu = RecordingGpu::new();
        let dst = GpuBuffer::new(
            &gpu,
            16,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        gpu.fail_next("submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(upload_via_staging(&gpu, gpu.command_pool(), dst.buffer, &[1; 16]).is_err());
        assert_eq!(gpu.live_count(), 2);
        dst.destroy(&gpu);
    }

    #[test]
    fn image_failure_after_allocation_cleans_up() {
        let gpu = RecordingGpu::new();
        gpu.fail_next("create_image_view", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let desc = ImageDesc {
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        };
        assert!(GpuImage::new(&gpu, &desc, vk::ImageAspectFlags::DEPTH).is_err());
        assert_eq!(gpu.live_count(), 0);
    }
}
