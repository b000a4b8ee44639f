// SPDX-License-Identifier: CEPL-1.0
//! Wavefront OBJ models through `tobj`.
//!
//! Faces are triangulated and re-indexed so every vertex carries one
//! position/uv/color triple. Each OBJ object or group becomes one mesh; its
//! `usemtl` picks the material whose diffuse map names the texture.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;
use ember_render::{MeshData, ModelData, ModelSource, Vertex};
use tracing::{debug, warn};

use crate::AssetError;

/// Final component of a texture path, accepting either separator.
///
/// Exporters on Windows write `map_Kd textures\brick.png`; textures are looked
/// up by bare file name under the decoder's root.
pub fn texture_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ObjLoader;

impl ObjLoader {
    /// Parses OBJ text from `reader`. `materials` resolves each `mtllib` name;
    /// `source` only labels errors and logs.
    pub fn parse<R, M>(
        &self,
        source: &Path,
        reader: &mut R,
        materials: M,
    ) -> Result<ModelData, AssetError>
    where
        R: BufRead,
        M: Fn(&Path) -> tobj::MTLLoadResult,
    {
        let (models, mtl) =
            tobj::load_obj_buf(reader, &load_options(), materials).map_err(|e| {
                AssetError::Obj {
                    path: source.to_path_buf(),
                    source: e,
                }
            })?;

        let textures: Vec<Option<String>> = match mtl {
            Ok(mats) => mats
                .into_iter()
                .map(|m| {
                    m.diffuse_texture
                        .filter(|t| !t.trim().is_empty())
                        .map(|t| texture_file_name(t.trim()).to_owned())
                })
                .collect(),
            Err(e) => {
                warn!(
                    "{}: materials unavailable ({e}); drawing untextured",
                    source.display()
                );
                Vec::new()
            }
        };

        let meshes: Vec<MeshData> = models.into_iter().filter_map(|m| convert(m.mesh)).collect();
        if meshes.is_empty() {
            return Err(AssetError::Empty {
                path: source.to_path_buf(),
            });
        }

        debug!(
            "{}: {} meshes, {} materials",
            source.display(),
            meshes.len(),
            textures.len()
        );
        Ok(ModelData { meshes, textures })
    }
}

impl ModelSource for ObjLoader {
    fn load_model(&self, path: &Path) -> Result<ModelData> {
        let file = File::open(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = path.parent().unwrap_or(Path::new(""));
        let model = self.parse(path, &mut BufReader::new(file), |mtl| {
            tobj::load_mtl(dir.join(mtl))
        })?;
        Ok(model)
    }
}

fn convert(mesh: tobj::Mesh) -> Option<MeshData> {
    if mesh.indices.is_empty() {
        return None;
    }
    let p = &mesh.positions;
    let t = &mesh.texcoords;
    let c = &mesh.vertex_color;

    let vertices = (0..p.len() / 3)
        .map(|i| {
            // OBJ puts v = 0 at the bottom of the image
            let uv = if t.len() >= 2 * (i + 1) {
                [t[2 * i], 1.0 - t[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            let pos = [p[3 * i], p[3 * i + 1], p[3 * i + 2]];
            if c.len() >= 3 * (i + 1) {
                Vertex {
                    pos,
                    color: [c[3 * i], c[3 * i + 1], c[3 * i + 2]],
                    uv,
                }
            } else {
                Vertex::textured(pos, uv)
            }
        })
        .collect();

    Some(MeshData {
        vertices,
        indices: mesh.indices,
        material: mesh.material_id,
    })
}
