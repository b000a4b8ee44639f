// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod input;
mod window;

pub use input::{InputState, KeyState};
pub use window::{create_window, set_cursor_captured, WindowConfig};
pub use winit;
