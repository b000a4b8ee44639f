// SPDX-License-Identifier: CEPL-1.0
//! File-backed implementations of the model and image traits in `ember-render`.

use std::path::PathBuf;

use thiserror::Error;

mod obj;
mod texture;

pub use crate::texture::FileImageDecoder;
pub use crate::obj::{texture_file_name, ObjLoader};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("{}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error("{}: no triangles", path.display())]
    Empty { path: PathBuf },
}
