// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use tracing::{info, warn};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{CursorGrabMode, Window};

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan renderer".to_owned(),
            width: 1600,
            height: 900,
            resizable: false,
        }
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, cfg: &WindowConfig) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(cfg.title.clone())
        .with_inner_size(PhysicalSize::new(cfg.width.max(1), cfg.height.max(1)))
        .with_resizable(cfg.resizable);
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = window.inner_size();
    info!("window \"{}\" {}x{}", cfg.title, size.width, size.height);
    Ok(window)
}

/// Hides and locks the cursor for mouse look. Returns whether it is captured.
pub fn set_cursor_captured(window: &Window, captured: bool) -> bool {
    if !captured {
        let _ = window.set_cursor_grab(CursorGrabMode::None);
        window.set_cursor_visible(true);
        return false;
    }

    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    match grabbed {
        Ok(()) => {
            window.set_cursor_visible(false);
            true
        }
        Err(e) => {
            warn!("cursor grab unavailable: {e}");
            false
        }
    }
}
