// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! Each slot owns a command buffer, its uniform buffers and three sync
//! objects. A frame runs: wait on the slot fence, acquire an image, reset the
//! fence, write the slot's uniforms, record, submit (waiting for the acquire at
//! color output, signalling the slot's fence and render semaphore), present.
//! The slot fence is only reset once the frame is certain to be submitted, so
//! a failed acquire leaves it signaled and the next wait cannot hang.

use ash::vk;
use tracing::trace;

use crate::error::{ResultExt, VkError, VkResult};
use crate::gpu::{Gpu, RenderPassBegin, Submission};
use crate::mesh::Scene;
use crate::texture::TextureStore;
use crate::uniforms::{FrameUniforms, ViewProjection};

const NO_TIMEOUT: u64 = u64::MAX;

#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns immediately.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new<G: Gpu + ?Sized>(gpu: &G) -> VkResult<Self> {
        let image_available = gpu.create_semaphore().creating("create_semaphore")?;
        let render_finished = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(result) => {
                gpu.destroy_semaphore(image_available);
                return Err::<Self, _>(result).creating("create_semaphore");
            }
        };
        let in_flight = match gpu.create_fence(true) {
            Ok(f) => f,
            Err(result) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err::<Self, _>(result).creating("create_fence");
            }
        };
        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    fn destroy<G: Gpu + ?Sized>(self, gpu: &G) {
        gpu.destroy_fence(self.in_flight);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_available);
    }
}

/// What a frame draws into. Borrowed from the current swapchain and pipeline.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget<'a> {
    pub swapchain: vk::SwapchainKHR,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly.
    Suboptimal,
}

#[derive(Default)]
pub struct Frames {
    sync: Vec<FrameSync>,
    commands: Vec<vk::CommandBuffer>,
    uniforms: FrameUniforms,
    pool: vk::CommandPool,
    current: usize,
}

impl Frames {
    pub fn new<G: Gpu + ?Sized>(
        gpu: &G,
        pool: vk::CommandPool,
        uniform_layout: vk::DescriptorSetLayout,
        count: usize,
        max_objects: usize,
    ) -> VkResult<Self> {
        let count = count.max(1);
        let uniforms = FrameUniforms::new(gpu, uniform_layout, count, max_objects)?;
        let mut frames = Self {
            sync: Vec::with_capacity(count),
            commands: Vec::new(),
            uniforms,
            pool,
            current: 0,
        };
        if let Err(e) = frames.allocate(gpu, count) {
            frames.destroy(gpu);
            return Err(e);
        }
        Ok(frames)
    }

    fn allocate<G: Gpu + ?Sized>(&mut self, gpu: &G, count: usize) -> VkResult<()> {
        self.commands = gpu
            .allocate_command_buffers(self.pool, count as u32)
            .creating("allocate_command_buffers(frames)")?;
        for _ in 0..count {
            self.sync.push(FrameSync::new(gpu)?);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sync.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync.is_empty()
    }

    /// Slot the next [`Frames::draw`] will use.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn sync(&self, slot: usize) -> &FrameSync {
        &self.sync[slot]
    }

    pub fn command_buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.commands[slot]
    }

    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }

    /// Renders `scene` into the next swapchain image and presents it.
    ///
    /// `SurfaceOutOfDate` from acquire leaves the slot untouched; from present
    /// the frame was already submitted and the slot has advanced.
    pub fn draw<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        target: &FrameTarget,
        scene: &Scene,
        textures: &TextureStore,
        view_projection: &ViewProjection,
    ) -> VkResult<FrameStatus> {
        let slot = self.current;
        let sync = self.sync[slot];
        let cmd = self.commands[slot];

        gpu.wait_for_fence(sync.in_flight, NO_TIMEOUT)
            .in_frame("wait_for_fences")?;

        let (image_index, acquire_suboptimal) = gpu
            .acquire_next_image(target.swapchain, sync.image_available, NO_TIMEOUT)
            .in_frame("acquire_next_image")?;
        // images and framebuffers are built together, so a miss is a broken swapchain
        let framebuffer = *target
            .framebuffers
            .get(image_index as usize)
            .ok_or(VkError::Frame {
                what: "framebuffer for acquired image",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        gpu.reset_fence(sync.in_flight).in_frame("reset_fences")?;

        // slot fence has signaled, so the GPU is done reading these buffers
        self.uniforms
            .write(gpu, slot, view_projection, scene.transforms())?;
        self.record(gpu, cmd, slot, framebuffer, target, scene, textures)?;

        let submission = Submission {
            command_buffer: cmd,
            wait: Some((
                sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(sync.render_finished),
        };
        gpu.submit(gpu.graphics_queue(), &submission, sync.in_flight)
            .in_frame("queue_submit")?;
        self.advance();

        let present_suboptimal = gpu
            .present(
                gpu.present_queue(),
                target.swapchain,
                image_index,
                sync.render_finished,
            )
            .in_frame("queue_present")?;

        trace!(slot, image_index, "frame presented");
        if acquire_suboptimal || present_suboptimal {
            Ok(FrameStatus::Suboptimal)
        } else {
            Ok(FrameStatus::Presented)
        }
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.sync.len();
    }

    #[allow(clippy::too_many_arguments)]
    fn record<G: Gpu + ?Sized>(
        &self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        slot: usize,
        framebuffer: vk::Framebuffer,
        target: &FrameTarget,
        scene: &Scene,
        textures: &TextureStore,
    ) -> VkResult<()> {
        gpu.reset_commands(cmd).in_frame("reset_command_buffer")?;
        gpu.begin_commands(cmd).in_frame("begin_command_buffer")?;

        gpu.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: target.render_pass,
                framebuffer,
                extent: target.extent,
                clear_color: target.clear_color,
            },
        );
        gpu.cmd_bind_pipeline(cmd, target.pipeline);
        gpu.cmd_set_viewport_scissor(cmd, target.extent);

        let uniform_set = self.uniforms.set(slot);
        for (id, model) in scene.iter().take(self.uniforms.capacity()) {
            let offset = self.uniforms.dynamic_offset(id.0);
            for mesh in model.meshes() {
                gpu.cmd_bind_geometry(cmd, mesh.vertex_buffer(), mesh.index_buffer());
                gpu.cmd_bind_descriptor_sets(
                    cmd,
                    target.layout,
                    &[uniform_set, textures.set(mesh.texture())],
                    &[offset],
                );
                gpu.cmd_draw_indexed(cmd, mesh.index_count());
            }
        }

        gpu.cmd_end_render_pass(cmd);
        gpu.end_commands(cmd).in_frame("end_command_buffer")
    }

    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        gpu.free_command_buffers(self.pool, &self.commands);
        self.commands.clear();
        for sync in self.sync.drain(..) {
            sync.destroy(gpu);
        }
        self.uniforms.destroy(gpu);
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Mesh, Model};
    use crate::testing::{Call, RecordingGpu};
    use crate::texture::TextureId;
    use ash::vk::Handle;
    use ember_render::{ImageData, Vertex};
    use glam::{Mat4, Vec3};

    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

    struct Fixture {
        gpu: RecordingGpu,
        frames: Frames,
        scene: Scene,
        textures: TextureStore,
        framebuffers: Vec<vk::Framebuffer>,
        uniform_layout: vk::DescriptorSetLayout,
    }

    impl Fixture {
        fn new(objects: usize) -> Self {
            let gpu = RecordingGpu::new();
            let pool = gpu.command_pool();
            let uniform_layout = crate::descriptor::create_uniform_set_layout(&gpu).unwrap();
            let frames = Frames::new(&gpu, pool, uniform_layout, 2, 8).unwrap();
            let mut textures = TextureStore::new(&gpu, pool, 4).unwrap();
            let checker = textures
                .create(&gpu, pool, &ImageData::solid([0, 0, 0, 255]))
                .unwrap();

            let mut scene = Scene::new(8);
            for i in 0..objects {
                let x = i as f32;
                let verts = [
                    Vertex::new([x, -0.4, 0.0], [1.0, 0.0, 0.0]),
                    Vertex::new([x, 0.4, 0.0], [0.0, 1.0, 0.0]),
                    Vertex::new([x - 0.8, 0.4, 0.0], [0.0, 0.0, 1.0]),
                    Vertex::new([x - 0.8, -0.4, 0.0], [1.0, 1.0, 0.0]),
                ];
                let texture = if i % 2 == 0 { TextureId::WHITE } else { checker };
                let mesh = Mesh::new(&gpu, pool, &verts, &QUAD_INDICES, texture).unwrap();
                let mut model = Model::new(vec![mesh]);
                model.set_transform(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)));
                scene.add(model).map_err(|(_, e)| e).unwrap();
            }

            let framebuffers = (0..3).map(|i| vk::Framebuffer::from_raw(0xF0 + i)).collect();
            gpu.clear_calls();
            Self {
                gpu,
                frames,
                scene,
                textures,
                framebuffers,
                uniform_layout,
            }
        }

        fn draw(&mut self) -> VkResult<FrameStatus> {
            let target = target(&self.framebuffers);
            self.frames.draw(
                &self.gpu,
                &target,
                &self.scene,
                &self.textures,
                &ViewProjection::default(),
            )
        }

        fn teardown(mut self) {
            self.frames.destroy(&self.gpu);
            self.scene.destroy(&self.gpu);
            self.textures.destroy(&self.gpu);
            self.gpu
                .destroy_descriptor_set_layout(self.uniform_layout);
            assert_eq!(self.gpu.live_count(), 0);
        }
    }

    fn target(framebuffers: &[vk::Framebuffer]) -> FrameTarget<'_> {
        FrameTarget {
            swapchain: vk::SwapchainKHR::from_raw(0x5C),
            framebuffers,
            extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            render_pass: vk::RenderPass::from_raw(0x9A),
            pipeline: vk::Pipeline::from_raw(0x91),
            layout: vk::PipelineLayout::from_raw(0x92),
            clear_color: [0.8, 0.1, 0.2, 1.0],
        }
    }

    fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
        calls.iter().position(pred).expect("call not recorded")
    }

    #[test]
    fn slots_cycle_through_their_own_fences() {
        let mut fx = Fixture::new(1);
        let fences = [
            fx.frames.sync(0).in_flight.as_raw(),
            fx.frames.sync(1).in_flight.as_raw(),
        ];

        for _ in 0..3 {
            assert_eq!(fx.draw().unwrap(), FrameStatus::Presented);
        }
        assert_eq!(fx.frames.current(), 1);

        let waited: Vec<u64> = fx
            .gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::WaitFence(f) => Some(*f),
                _ => None,
            })
            .collect();
        assert_eq!(waited, vec![fences[0], fences[1], fences[0]]);

        let presented: Vec<u32> = fx
            .gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Present { image_index, .. } => Some(*image_index),
                _ => None,
            })
            .collect();
        assert_eq!(presented, vec![0, 1, 2]);
        fx.teardown();
    }

    #[test]
    fn frame_steps_run_in_order() {
        let mut fx = Fixture::new(1);
        fx.draw().unwrap();
        let calls = fx.gpu.calls();

        let wait = position(&calls, |c| matches!(c, Call::WaitFence(_)));
        let acquire = position(&calls, |c| matches!(c, Call::Acquire { .. }));
        let reset = position(&calls, |c| matches!(c, Call::ResetFence(_)));
        let write = position(&calls, |c| matches!(c, Call::WriteMemory { .. }));
        let record = position(&calls, |c| matches!(c, Call::BeginCommands(_)));
        let submit = position(&calls, |c| matches!(c, Call::Submit { .. }));
        let present = position(&calls, |c| matches!(c, Call::Present { .. }));
        assert!(wait < acquire);
        assert!(acquire < reset);
        assert!(reset < write);
        assert!(write < record);
        assert!(record < submit);
        assert!(submit < present);
        fx.teardown();
    }

    #[test]
    fn submit_and_present_chain_the_slot_semaphores() {
        let mut fx = Fixture::new(1);
        fx.draw().unwrap();
        let sync = *fx.frames.sync(0);
        let cmd = fx.frames.command_buffer(0);

        let calls = fx.gpu.calls();
        assert!(calls.contains(&Call::Acquire {
            signal: sync.image_available.as_raw()
        }));
        assert!(calls.contains(&Call::Submit {
            queue: 0x0A,
            cmd: cmd.as_raw(),
            wait: Some(sync.image_available.as_raw()),
            signal: Some(sync.render_finished.as_raw()),
            fence: sync.in_flight.as_raw(),
        }));
        assert!(calls.contains(&Call::Present {
            image_index: 0,
            wait: sync.render_finished.as_raw(),
        }));
        assert!(calls.contains(&Call::BeginRenderPass {
            framebuffer: 0xF0,
            clear: [0.8, 0.1, 0.2, 1.0],
        }));
        fx.teardown();
    }

    #[test]
    fn out_of_date_acquire_keeps_fence_and_slot() {
        let mut fx = Fixture::new(1);
        fx.gpu
            .script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let err = fx.draw().unwrap_err();
        assert!(matches!(err, VkError::SurfaceOutOfDate));
        assert!(err.is_recoverable());
        assert_eq!(fx.frames.current(), 0);
        let calls = fx.gpu.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::ResetFence(_))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Submit { .. })));

        // the retry waits on the same, still signaled, fence
        fx.gpu.clear_calls();
        assert_eq!(fx.draw().unwrap(), FrameStatus::Presented);
        assert_eq!(
            fx.gpu.calls()[0],
            Call::WaitFence(fx.frames.sync(0).in_flight.as_raw())
        );
        fx.teardown();
    }

    #[test]
    fn suboptimal_and_stale_present_are_reported() {
        let mut fx = Fixture::new(1);
        fx.gpu.script_present(Ok(true));
        assert_eq!(fx.draw().unwrap(), FrameStatus::Suboptimal);

        fx.gpu
            .script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(matches!(fx.draw(), Err(VkError::SurfaceOutOfDate)));
        // submitted before present failed, so the slot moved on
        assert_eq!(fx.frames.current(), 0);

        fx.gpu.script_acquire(Ok((1, true)));
        assert_eq!(fx.draw().unwrap(), FrameStatus::Suboptimal);
        fx.teardown();
    }

    #[test]
    fn image_without_framebuffer_is_fatal() {
        let mut fx = Fixture::new(1);
        fx.gpu.script_acquire(Ok((7, false)));

        let err = fx.draw().unwrap_err();
        assert!(matches!(err, VkError::Frame { .. }));
        assert!(!err.is_recoverable());
        let calls = fx.gpu.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::ResetFence(_))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Submit { .. })));
        fx.teardown();
    }

    #[test]
    fn device_loss_is_fatal() {
        let mut fx = Fixture::new(1);
        fx.gpu.fail_next("submit", vk::Result::ERROR_DEVICE_LOST);
        let err = fx.draw().unwrap_err();
        assert!(matches!(err, VkError::DeviceLost));
        assert!(!err.is_recoverable());
        fx.teardown();
    }

    #[test]
    fn each_object_binds_its_own_dynamic_offset_and_texture() {
        let mut fx = Fixture::new(3);
        fx.draw().unwrap();

        let binds: Vec<(Vec<u64>, Vec<u32>)> = fx
            .gpu
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::BindSets { sets, offsets } => Some((sets, offsets)),
                _ => None,
            })
            .collect();
        assert_eq!(binds.len(), 3);

        let stride = fx.frames.uniforms().stride() as u32;
        let offsets: Vec<u32> = binds.iter().map(|(_, o)| o[0]).collect();
        assert_eq!(offsets, vec![0, stride, 2 * stride]);

        let uniform_set = fx.frames.uniforms().set(0).as_raw();
        assert!(binds.iter().all(|(sets, _)| sets[0] == uniform_set));
        assert_eq!(binds[0].0[1], binds[2].0[1]);
        assert_ne!(binds[0].0[1], binds[1].0[1]);

        let draws = fx
            .gpu
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::DrawIndexed(6)))
            .count();
        assert_eq!(draws, 3);
        fx.teardown();
    }

    #[test]
    fn uniforms_land_in_the_drawing_slot() {
        let mut fx = Fixture::new(2);
        fx.draw().unwrap();
        fx.draw().unwrap();

        let stride = fx.frames.uniforms().stride();
        for slot in 0..2 {
            let bytes = fx.gpu.memory_bytes(fx.frames.uniforms().slot(slot).objects.memory);
            let second = &bytes[stride..stride + 64];
            let expected = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)).to_cols_array();
            assert_eq!(second, bytemuck::cast_slice::<f32, u8>(&expected));
        }
        fx.teardown();
    }

    #[test]
    fn partial_construction_releases_everything() {
        let gpu = RecordingGpu::new();
        let layout = crate::descriptor::create_uniform_set_layout(&gpu).unwrap();
        gpu.fail_nth("create_fence", 1, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(Frames::new(&gpu, gpu.command_pool(), layout, 2, 4).is_err());
        gpu.destroy_descriptor_set_layout(layout);
        assert_eq!(gpu.live_count(), 0);
    }
}
