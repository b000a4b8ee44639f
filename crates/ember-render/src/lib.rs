// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use anyhow::Result;
use ember_math::FlyCamera;
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod model;
mod vertex;

pub use model::{ImageData, ImageDecoder, MeshData, ModelData, ModelSource};
pub use vertex::Vertex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

/// Handle to a model added with [`Renderer::load_model`]; doubles as its object index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(pub usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    /// SPIR-V compiled into the backend at build time.
    Builtin,
    Files { vertex: PathBuf, fragment: PathBuf },
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    /// `false` forces FIFO; `true` prefers MAILBOX when offered.
    pub low_latency: bool,
    pub frames_in_flight: usize,
    pub max_objects: usize,
    pub max_textures: usize,
    pub validation: bool,
    pub shaders: ShaderSource,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.8, 0.1, 0.2, 1.0],
            low_latency: true,
            frames_in_flight: 2,
            max_objects: 64,
            max_textures: 64,
            validation: cfg!(debug_assertions),
            shaders: ShaderSource::Builtin,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}

    /// Uploads every mesh of `model` and the textures its materials name.
    fn load_model(&mut self, model: &ModelData, images: &dyn ImageDecoder) -> Result<ModelId>;
    fn set_model_transform(&mut self, id: ModelId, transform: Mat4) -> Result<()>;
    fn set_camera(&mut self, camera: &FlyCamera);
}
