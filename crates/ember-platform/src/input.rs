// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use ember_math::{CameraInput, Movement};
use glam::Vec2;
use winit::event::{DeviceEvent, ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
    #[default]
    Idle,
}

/// Keyboard and mouse state fed by the window's event handler.
///
/// Owned by the application and handed to whoever needs it for the frame;
/// nothing here is global.
#[derive(Debug, Default)]
pub struct InputState {
    keys: HashMap<KeyCode, KeyState>,
    mouse_delta: Vec2,
    last_cursor: Option<Vec2>,
    captured: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.set_key(code, event.state);
                }
            }
            WindowEvent::CursorMoved { position, .. } if !self.captured => {
                self.cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::Focused(false) => {
                self.keys.clear();
                self.last_cursor = None;
            }
            _ => {}
        }
    }

    /// Raw motion is used while the cursor is captured.
    pub fn handle_device_event(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.captured {
                self.add_mouse_motion(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    pub fn set_captured(&mut self, captured: bool) {
        self.captured = captured;
        self.last_cursor = None;
    }

    pub fn set_key(&mut self, code: KeyCode, state: ElementState) {
        let next = match state {
            ElementState::Pressed => KeyState::Pressed,
            ElementState::Released => KeyState::Released,
        };
        self.keys.insert(code, next);
    }

    pub fn key_state(&self, code: KeyCode) -> KeyState {
        self.keys.get(&code).copied().unwrap_or_default()
    }

    pub fn key_down(&self, code: KeyCode) -> bool {
        self.key_state(code) == KeyState::Pressed
    }

    /// True once per release; the key returns to idle afterwards.
    pub fn key_up(&mut self, code: KeyCode) -> bool {
        match self.keys.get_mut(&code) {
            Some(state @ KeyState::Released) => {
                *state = KeyState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Absolute cursor position in window pixels. The first sample only primes
    /// the reference point.
    pub fn cursor_moved(&mut self, x: f32, y: f32) {
        let now = Vec2::new(x, y);
        if let Some(last) = self.last_cursor {
            self.mouse_delta += Vec2::new(now.x - last.x, last.y - now.y);
        }
        self.last_cursor = Some(now);
    }

    /// Relative motion in device units, y pointing down.
    pub fn add_mouse_motion(&mut self, dx: f32, dy: f32) {
        self.mouse_delta += Vec2::new(dx, -dy);
    }

    /// Mouse travel since the previous call; y is positive when moving up.
    pub fn take_mouse_delta(&mut self) -> Vec2 {
        std::mem::take(&mut self.mouse_delta)
    }

    pub fn movement(&self) -> Movement {
        let mut m = Movement::empty();
        m.set(Movement::FORWARD, self.key_down(KeyCode::KeyW));
        m.set(Movement::BACKWARD, self.key_down(KeyCode::KeyS));
        m.set(Movement::LEFT, self.key_down(KeyCode::KeyA));
        m.set(Movement::RIGHT, self.key_down(KeyCode::KeyD));
        m
    }

    /// Snapshot for one camera update; consumes the mouse delta.
    pub fn camera_input(&mut self) -> CameraInput {
        CameraInput {
            movement: self.movement(),
            look: self.take_mouse_delta(),
        }
    }
}
