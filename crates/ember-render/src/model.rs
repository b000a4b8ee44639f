// SPDX-License-Identifier: CEPL-1.0
use std::path::Path;

use anyhow::{bail, Result};

use crate::Vertex;

/// One drawable primitive as handed over by a model source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Index into [`ModelData::textures`].
    pub material: Option<usize>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            material: None,
        }
    }

    /// Rejects empty primitives and indices past the vertex array.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            bail!("mesh has no geometry");
        }
        let count = self.vertices.len() as u32;
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= count) {
            bail!("index {bad} out of range for {count} vertices");
        }
        Ok(())
    }
}

/// Meshes plus the material → texture file mapping of one model file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelData {
    pub meshes: Vec<MeshData>,
    pub textures: Vec<Option<String>>,
}

impl ModelData {
    pub fn from_mesh(mesh: MeshData) -> Self {
        Self {
            meshes: vec![mesh],
            textures: Vec::new(),
        }
    }

    pub fn texture_for(&self, mesh: &MeshData) -> Option<&str> {
        mesh.material
            .and_then(|m| self.textures.get(m))
            .and_then(|t| t.as_deref())
    }
}

pub trait ModelSource {
    fn load_model(&self, path: &Path) -> Result<ModelData>;
}

/// Decoded RGBA8 pixels, rows top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ImageData {
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: rgba.to_vec(),
        }
    }

    /// Rejects empty images and pixel buffers that do not cover `width * height`.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("image is {}x{}", self.width, self.height);
        }
        let expected = self.width as u64 * self.height as u64 * 4;
        if self.rgba.len() as u64 != expected {
            bail!(
                "{}x{} image needs {expected} bytes, got {}",
                self.width,
                self.height,
                self.rgba.len()
            );
        }
        Ok(())
    }
}

pub trait ImageDecoder {
    /// `name` is the texture file name recorded by the model source.
    fn decode(&self, name: &str) -> Result<ImageData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> MeshData {
        let v = Vertex::new([0.0; 3], [1.0; 3]);
        MeshData::new(vec![v; 4], vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn quad_is_valid() {
        assert!(quad().validate().is_ok());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut mesh = quad();
        mesh.indices.push(4);
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn texture_lookup_follows_material_index() {
        let mut mesh = quad();
        mesh.material = Some(1);
        let model = ModelData {
            meshes: vec![mesh.clone()],
            textures: vec![None, Some("brick.png".into())],
        };
        assert_eq!(model.texture_for(&mesh), Some("brick.png"));
        mesh.material = Some(0);
        assert_eq!(model.texture_for(&mesh), None);
    }

    #[test]
    fn image_pixels_must_cover_the_extent() {
        assert!(ImageData::solid([255; 4]).validate().is_ok());
        let short = ImageData {
            width: 64,
            height: 64,
            rgba: vec![255; 4],
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = ImageData {
            width: 0,
            height: 0,
            rgba: Vec::new(),
        };
        assert!(empty.validate().is_err());
    }
}
