// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3};

bitflags! {
    /// Held movement keys for one frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Movement: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

/// Input consumed by one camera update.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraInput {
    pub movement: Movement,
    /// Mouse travel since the last update; positive y looks up.
    pub look: Vec2,
}

const PITCH_LIMIT: f32 = 89.0;

/// First-person camera driven by yaw/pitch in degrees.
#[derive(Clone, Debug)]
pub struct FlyCamera {
    pub position: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub move_speed: f32,
    pub turn_speed: f32,
    pub fov_y_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 10.0),
            up: Vec3::Y,
            yaw: -90.0,
            pitch: 0.0,
            move_speed: 20.0,
            turn_speed: 0.1,
            fov_y_deg: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl FlyCamera {
    /// Unit view direction derived from yaw and pitch.
    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.front().cross(self.up).normalize()
    }

    /// Applies look first, then movement along the updated axes.
    pub fn update(&mut self, input: &CameraInput, dt: f32) {
        self.yaw += input.look.x * self.turn_speed;
        self.pitch = (self.pitch + input.look.y * self.turn_speed).clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let step = self.move_speed * dt;
        let front = self.front();
        let right = self.right();

        if input.movement.contains(Movement::FORWARD) {
            self.position += front * step;
        } else if input.movement.contains(Movement::BACKWARD) {
            self.position -= front * step;
        }

        if input.movement.contains(Movement::RIGHT) {
            self.position += right * step;
        } else if input.movement.contains(Movement::LEFT) {
            self.position -= right * step;
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front(), self.up)
    }

    /// Right-handed perspective with a 0..1 depth range and Y pointing down in clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y_deg.to_radians(), aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }
}
