// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

/// Interleaved vertex: position, color, texture coordinate.
///
/// Color multiplies the sampled texel, so white leaves textures untouched and
/// untextured meshes sample the backend's white default.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3]) -> Self {
        Self {
            pos,
            color,
            uv: [0.0, 0.0],
        }
    }

    pub const fn textured(pos: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            pos,
            color: [1.0, 1.0, 1.0],
            uv,
        }
    }
}
