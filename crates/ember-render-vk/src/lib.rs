// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for [`ember_render::Renderer`].
//!
//! Ownership runs device → command pool / set layouts → textures, scene,
//! frames → swapchain → render pass → pipeline. Teardown drains the device and
//! walks that list backwards; the [`DeviceContext`] field is declared last so
//! the device and instance go after everything built on them.

use anyhow::{Context, Result};
use ash::vk;
use ember_math::FlyCamera;
use ember_render::{
    ImageDecoder, ModelData, ModelId, RenderSettings, RenderSize, Renderer,
};
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

mod descriptor;
mod device;
mod error;
mod frame;
mod gpu;
mod memory;
mod mesh;
mod pipeline;
mod swapchain;
mod texture;
mod uniforms;

#[cfg(test)]
mod testing;

pub use device::{find_queue_families, DeviceContext, QueueFamilies};
pub use error::{VkError, VkResult};
pub use frame::{FrameStatus, FrameSync, FrameTarget, Frames};
pub use gpu::Gpu;
pub use memory::{aligned_stride, find_memory_type};
pub use mesh::{Mesh, Model, Scene};
pub use pipeline::{GraphicsPipeline, ShaderCode};
pub use swapchain::{choose_extent, choose_image_count, choose_present_mode, choose_surface_format};
pub use texture::TextureId;
pub use uniforms::{StridedBlocks, ViewProjection};

use descriptor::create_uniform_set_layout;
use error::ResultExt;
use pipeline::create_render_pass;
use swapchain::{pick_depth_format, Swapchain};
use texture::TextureStore;

pub struct VkRenderer {
    settings: RenderSettings,
    size: RenderSize,
    prefer_mailbox: bool,
    stale: bool,
    view_projection: ViewProjection,
    shaders: ShaderCode,
    depth_format: vk::Format,
    color_format: vk::Format,

    command_pool: vk::CommandPool,
    uniform_layout: vk::DescriptorSetLayout,
    textures: TextureStore,
    scene: Scene,
    frames: Frames,

    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    pipeline: GraphicsPipeline,

    ctx: DeviceContext,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e}");
            }
            let ctx = &self.ctx;
            self.pipeline.destroy(&ctx.device);
            if self.render_pass != vk::RenderPass::null() {
                ctx.device.destroy_render_pass(self.render_pass, None);
            }
            self.swapchain.destroy(ctx);

            self.frames.destroy(ctx);
            self.scene.destroy(ctx);
            self.textures.destroy(ctx);
            if self.uniform_layout != vk::DescriptorSetLayout::null() {
                ctx.destroy_descriptor_set_layout(self.uniform_layout);
            }
            if self.command_pool != vk::CommandPool::null() {
                ctx.device.destroy_command_pool(self.command_pool, None);
            }
        }
        // ctx drops here: device, surface, messenger, instance
    }
}

impl VkRenderer {
    /// Everything below the swapchain. Each step stores into `self` so a
    /// failure part way is released by `Drop`.
    unsafe fn init(&mut self) -> VkResult<()> {
        self.command_pool = self.ctx.create_command_pool()?;
        self.uniform_layout = create_uniform_set_layout(&self.ctx)?;
        self.textures =
            TextureStore::new(&self.ctx, self.command_pool, self.settings.max_textures)?;
        self.frames = Frames::new(
            &self.ctx,
            self.command_pool,
            self.uniform_layout,
            self.settings.frames_in_flight,
            self.settings.max_objects,
        )?;
        if self.size.is_empty() {
            debug!("surface has no area yet; swapchain deferred");
            return Ok(());
        }
        self.recreate_swapchain()
    }

    /// Rebuilds the swapchain at the current size. The render pass and
    /// pipeline are rebuilt only when the surface format changes.
    unsafe fn recreate_swapchain(&mut self) -> VkResult<()> {
        self.ctx
            .device_wait_idle()
            .creating("device_wait_idle")?;

        let mut old = std::mem::take(&mut self.swapchain);
        let fresh = Swapchain::new(
            &self.ctx,
            self.size,
            self.prefer_mailbox,
            self.depth_format,
            old.handle,
        );
        old.destroy(&self.ctx);
        self.swapchain = fresh?;

        let format = self.swapchain.format.format;
        if format != self.color_format || self.render_pass == vk::RenderPass::null() {
            self.pipeline.destroy(&self.ctx.device);
            if self.render_pass != vk::RenderPass::null() {
                self.ctx.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            self.render_pass = create_render_pass(&self.ctx.device, format, self.depth_format)?;
            self.pipeline = GraphicsPipeline::new(
                &self.ctx.device,
                self.render_pass,
                &[self.uniform_layout, self.textures.layout()],
                &self.shaders,
            )?;
            self.color_format = format;
            info!("pipeline built for {:?}", format);
        }

        self.swapchain.attach(&self.ctx, self.render_pass)?;
        self.stale = false;
        Ok(())
    }

    fn extent_size(&self) -> RenderSize {
        RenderSize {
            width: self.swapchain.extent.width,
            height: self.swapchain.extent.height,
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: RenderSettings,
    ) -> Result<Self> {
        unsafe {
            let ctx = DeviceContext::new(window, display, settings.validation)
                .context("initialising Vulkan")?;
            let shaders = ShaderCode::load(&settings.shaders).context("loading shaders")?;
            let depth_format = pick_depth_format(&ctx);

            let mut r = VkRenderer {
                size,
                prefer_mailbox: settings.low_latency,
                stale: false,
                view_projection: ViewProjection::default(),
                shaders,
                depth_format,
                color_format: vk::Format::UNDEFINED,
                command_pool: vk::CommandPool::null(),
                uniform_layout: vk::DescriptorSetLayout::null(),
                textures: TextureStore::default(),
                scene: Scene::new(settings.max_objects),
                frames: Frames::default(),
                swapchain: Swapchain::default(),
                render_pass: vk::RenderPass::null(),
                pipeline: GraphicsPipeline::default(),
                settings,
                ctx,
            };
            r.init().context("creating renderer resources")?;
            info!(
                "renderer ready on {} ({} frames in flight, depth {:?})",
                r.ctx.name(),
                r.frames.len(),
                r.depth_format
            );
            Ok(r)
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size == self.size && !self.stale && self.swapchain.handle != vk::SwapchainKHR::null() {
            return Ok(());
        }
        self.size = size;
        if size.is_empty() {
            debug!("surface minimised; rendering paused");
            return Ok(());
        }
        unsafe { self.recreate_swapchain() }.context("recreating swapchain")
    }

    fn render(&mut self) -> Result<()> {
        if self.size.is_empty() {
            return Ok(());
        }
        if self.stale || self.swapchain.handle == vk::SwapchainKHR::null() {
            unsafe { self.recreate_swapchain() }.context("recreating swapchain")?;
        }

        let target = FrameTarget {
            swapchain: self.swapchain.handle,
            framebuffers: self.swapchain.framebuffers(),
            extent: self.swapchain.extent,
            render_pass: self.render_pass,
            pipeline: self.pipeline.pipeline,
            layout: self.pipeline.layout,
            clear_color: self.settings.clear_color,
        };
        let status = self.frames.draw(
            &self.ctx,
            &target,
            &self.scene,
            &self.textures,
            &self.view_projection,
        );

        match status {
            Ok(FrameStatus::Presented) => Ok(()),
            Ok(FrameStatus::Suboptimal) | Err(VkError::SurfaceOutOfDate) => {
                info!("swapchain out of date; recreating");
                unsafe { self.recreate_swapchain() }.context("recreating swapchain")
            }
            Err(e) => Err(e).context("drawing frame"),
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.settings.clear_color = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        let prefer_mailbox = !on;
        if prefer_mailbox != self.prefer_mailbox {
            self.prefer_mailbox = prefer_mailbox;
            self.stale = true;
        }
    }

    fn load_model(&mut self, model: &ModelData, images: &dyn ImageDecoder) -> Result<ModelId> {
        let mut material_textures = Vec::with_capacity(model.textures.len());
        for name in &model.textures {
            let id = match name {
                None => TextureId::WHITE,
                Some(name) => match images
                    .decode(name)
                    .and_then(|image| image.validate().map(|()| image))
                {
                    Ok(image) => self
                        .textures
                        .create(&self.ctx, self.command_pool, &image)
                        .with_context(|| format!("uploading texture {name}"))?,
                    Err(e) => {
                        warn!("texture {name}: {e:#}; drawing untextured");
                        TextureId::WHITE
                    }
                },
            };
            material_textures.push(id);
        }

        let mut meshes = Vec::with_capacity(model.meshes.len());
        for (i, data) in model.meshes.iter().enumerate() {
            let texture = data
                .material
                .and_then(|m| material_textures.get(m).copied())
                .unwrap_or(TextureId::WHITE);
            let uploaded = data.validate().and_then(|()| {
                Mesh::new(
                    &self.ctx,
                    self.command_pool,
                    &data.vertices,
                    &data.indices,
                    texture,
                )
                .map_err(anyhow::Error::from)
            });
            match uploaded {
                Ok(mesh) => meshes.push(mesh),
                Err(e) => {
                    Model::new(meshes).destroy(&self.ctx);
                    return Err(e).with_context(|| format!("uploading mesh {i}"));
                }
            }
        }

        let mesh_count = meshes.len();
        match self.scene.add(Model::new(meshes)) {
            Ok(id) => {
                info!("model {} loaded ({} meshes)", id.0, mesh_count);
                Ok(id)
            }
            Err((mut rejected, e)) => {
                rejected.destroy(&self.ctx);
                Err(e.into())
            }
        }
    }

    fn set_model_transform(&mut self, id: ModelId, transform: Mat4) -> Result<()> {
        Ok(self.scene.set_transform(id, transform)?)
    }

    fn set_camera(&mut self, camera: &FlyCamera) {
        let aspect = if self.swapchain.handle != vk::SwapchainKHR::null() {
            self.extent_size().aspect()
        } else {
            self.size.aspect()
        };
        self.view_projection = ViewProjection::new(camera.projection(aspect), camera.view());
    }
}
