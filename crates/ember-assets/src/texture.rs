// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};

use anyhow::Result;
use ember_render::{ImageData, ImageDecoder};
use tracing::debug;

use crate::{texture_file_name, AssetError};

/// Decodes textures from files under one directory, expanded to RGBA8.
#[derive(Clone, Debug)]
pub struct FileImageDecoder {
    root: PathBuf,
}

impl FileImageDecoder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, name: &str) -> Result<ImageData> {
        let path = self.root.join(texture_file_name(name));
        let image = image::open(&path).map_err(|source| AssetError::Image {
            path: path.clone(),
            source,
        })?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("decoded {} ({width}x{height})", path.display());
        Ok(ImageData {
            width,
            height,
            rgba: rgba.into_raw(),
        })
    }
}
