// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod camera;

pub use camera::{CameraInput, FlyCamera, Movement};
pub use glam;
