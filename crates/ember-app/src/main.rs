// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use ember_assets::{FileImageDecoder, ObjLoader};
use ember_core::{init_tracing, FrameClock};
use ember_math::FlyCamera;
use ember_platform::winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::KeyCode,
    window::{Window, WindowId},
};
use ember_platform::{create_window, set_cursor_captured, InputState, WindowConfig};
use ember_render::{
    MeshData, ModelData, ModelSource, RenderSettings, RenderSize, Renderer, ShaderSource, Vertex,
};
use ember_render_vk::VkRenderer;
use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::Deserialize;
use tracing::{error, info, warn};

const CONFIG_FILE: &str = "ember.toml";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    camera: CameraCfg,
    scene: SceneCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
    resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let w = WindowConfig::default();
        WindowCfg {
            title: w.title,
            width: w.width,
            height: w.height,
            resizable: w.resizable,
        }
    }
}

impl WindowCfg {
    fn config(&self) -> WindowConfig {
        WindowConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: self.resizable,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    /// Block on events between frames instead of polling.
    vsync: bool,
    present_mode: PresentModeCfg,
    frames_in_flight: usize,
    max_objects: usize,
    max_textures: usize,
    validation: bool,
    vertex_shader: Option<PathBuf>,
    fragment_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let s = RenderSettings::default();
        RenderCfg {
            clear_color: s.clear_color,
            vsync: true,
            present_mode: PresentModeCfg::default(),
            frames_in_flight: s.frames_in_flight,
            max_objects: s.max_objects,
            max_textures: s.max_textures,
            validation: s.validation,
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

impl RenderCfg {
    fn settings(&self) -> RenderSettings {
        let shaders = match (&self.vertex_shader, &self.fragment_shader) {
            (Some(vertex), Some(fragment)) => ShaderSource::Files {
                vertex: vertex.clone(),
                fragment: fragment.clone(),
            },
            (None, None) => ShaderSource::Builtin,
            _ => {
                warn!("only one shader path configured; using built-in shaders");
                ShaderSource::Builtin
            }
        };
        RenderSettings {
            clear_color: self.clear_color,
            low_latency: self.present_mode == PresentModeCfg::Mailbox,
            frames_in_flight: self.frames_in_flight.max(1),
            max_objects: self.max_objects.max(1),
            max_textures: self.max_textures.max(1),
            validation: self.validation,
            shaders,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CameraCfg {
    position: [f32; 3],
    move_speed: f32,
    turn_speed: f32,
    fov_y_deg: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let c = FlyCamera::default();
        CameraCfg {
            position: c.position.to_array(),
            move_speed: c.move_speed,
            turn_speed: c.turn_speed,
            fov_y_deg: c.fov_y_deg,
        }
    }
}

impl CameraCfg {
    fn camera(&self) -> FlyCamera {
        FlyCamera {
            position: Vec3::from(self.position),
            move_speed: self.move_speed,
            turn_speed: self.turn_speed,
            fov_y_deg: self.fov_y_deg,
            ..FlyCamera::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SceneCfg {
    demo_quads: bool,
    models: Vec<ModelCfg>,
}

impl Default for SceneCfg {
    fn default() -> Self {
        SceneCfg {
            demo_quads: true,
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelCfg {
    path: PathBuf,
    /// Texture directory; the model's own directory when unset.
    #[serde(default)]
    textures: Option<PathBuf>,
    #[serde(default)]
    position: [f32; 3],
    #[serde(default)]
    rotation_deg: [f32; 3],
    #[serde(default = "unit_scale")]
    scale: f32,
}

fn unit_scale() -> f32 {
    1.0
}

impl ModelCfg {
    fn transform(&self) -> Mat4 {
        let [x, y, z] = self.rotation_deg.map(f32::to_radians);
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            Quat::from_euler(EulerRot::XYZ, x, y, z),
            Vec3::from(self.position),
        )
    }

    fn texture_dir(&self) -> PathBuf {
        match &self.textures {
            Some(dir) => dir.clone(),
            None => self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            info!("no {}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Two colored unit quads side by side.
fn demo_quads() -> [ModelData; 2] {
    let left = vec![
        Vertex::new([-0.1, -0.4, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([-0.1, 0.4, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([-0.9, 0.4, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([-0.9, -0.4, 0.0], [1.0, 1.0, 0.0]),
    ];
    let right = vec![
        Vertex::new([0.9, -0.4, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([0.9, 0.4, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([0.1, 0.4, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([0.1, -0.4, 0.0], [1.0, 1.0, 0.0]),
    ];
    [left, right].map(|v| ModelData::from_mesh(MeshData::new(v, QUAD_INDICES.to_vec())))
}

fn load_scene(renderer: &mut VkRenderer, cfg: &SceneCfg) -> Result<()> {
    if cfg.demo_quads {
        let images = FileImageDecoder::new(".");
        for (i, quad) in demo_quads().iter().enumerate() {
            let id = renderer.load_model(quad, &images)?;
            if i == 0 {
                renderer.set_model_transform(id, Mat4::from_rotation_z(45f32.to_radians()))?;
            }
        }
    }

    for entry in &cfg.models {
        let model = ObjLoader
            .load_model(&entry.path)
            .with_context(|| format!("loading {}", entry.path.display()))?;
        let images = FileImageDecoder::new(entry.texture_dir());
        let id = renderer
            .load_model(&model, &images)
            .with_context(|| format!("uploading {}", entry.path.display()))?;
        renderer.set_model_transform(id, entry.transform())?;
    }
    Ok(())
}

struct App {
    cfg: AppCfg,
    // dropped before the window it presents to
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    input: InputState,
    camera: FlyCamera,
    clock: FrameClock,
    size: RenderSize,
    paused: bool,
    focused: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let camera = cfg.camera.camera();
        App {
            cfg,
            renderer: None,
            window: None,
            input: InputState::new(),
            camera,
            clock: FrameClock::default(),
            size: RenderSize {
                width: 0,
                height: 0,
            },
            paused: false,
            focused: true,
            failure: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.cfg.window.config())?;
        let inner = window.inner_size();
        self.size = RenderSize {
            width: inner.width,
            height: inner.height,
        };
        self.paused = self.size.is_empty();

        let mut renderer = VkRenderer::new(&window, &window, self.size, self.cfg.render.settings())?;
        load_scene(&mut renderer, &self.cfg.scene).context("loading scene")?;
        renderer.set_camera(&self.camera);

        let captured = set_cursor_captured(&window, self.focused);
        self.input.set_captured(captured);
        window.request_redraw();

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.clock.reset();
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let dt = self.clock.tick();
        let input = self.input.camera_input();
        if self.focused {
            self.camera.update(&input, dt);
        }
        renderer.set_camera(&self.camera);
        renderer.render()
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        self.failure = Some(e);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.failure.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e.context("starting renderer"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }
        self.input.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.shutdown(event_loop);
            }

            WindowEvent::KeyboardInput { .. } => {
                if self.input.key_up(KeyCode::Escape) {
                    info!("escape released; exiting");
                    self.shutdown(event_loop);
                }
            }

            WindowEvent::Resized(new_size) => {
                self.size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.size.is_empty();
                info!(
                    "resized to {}x{} (paused={})",
                    self.size.width, self.size.height, self.paused
                );
                let resized = match self.renderer.as_mut() {
                    Some(renderer) => renderer.resize(self.size),
                    None => Ok(()),
                };
                if let Err(e) = resized {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.size.is_empty();
            }

            WindowEvent::Focused(focused) => {
                self.focused = focused;
                if let Some(window) = &self.window {
                    let captured = set_cursor_captured(window, focused);
                    self.input.set_captured(captured);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    // background windows present at display rate
                    let vsync = !focused || self.cfg.render.present_mode == PresentModeCfg::Fifo;
                    renderer.set_vsync(vsync);
                }
                if focused {
                    self.clock.reset();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                if let Err(e) = self.frame() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        self.input.handle_device_event(&event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.clock.reset();
            return;
        }
        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        window.request_redraw();
    }
}

fn run() -> Result<()> {
    let cfg = load_cfg(Path::new(CONFIG_FILE));
    let event_loop = EventLoop::new().context("creating event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
