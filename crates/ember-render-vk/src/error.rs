// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

pub type VkResult<T> = Result<T, VkError>;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("no physical device supports graphics, presentation and swapchains")]
    DeviceUnavailable,
    #[error("instance extension {0} is not available")]
    ExtensionUnavailable(String),
    #[error("validation layer {0} is not available")]
    LayerUnavailable(String),
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("{what} failed: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },
    #[error("no memory type in mask {type_bits:#b} has {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("scene holds at most {capacity} objects")]
    SceneFull { capacity: usize },
    #[error("no model with id {0}")]
    UnknownModel(usize),
    #[error("texture pool holds at most {capacity} textures")]
    TextureCapacity { capacity: usize },
    #[error("texture {width}x{height} needs {expected} bytes of RGBA8, got {len}")]
    InvalidImage {
        width: u32,
        height: u32,
        expected: u64,
        len: usize,
    },
    #[error("surface is out of date")]
    SurfaceOutOfDate,
    #[error("device lost")]
    DeviceLost,
    #[error("{what} failed: {result}")]
    Frame {
        what: &'static str,
        result: vk::Result,
    },
    #[error("shader {}: {source}", path.display())]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VkError {
    /// Only a stale surface can be fixed by rebuilding the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VkError::SurfaceOutOfDate)
    }

    pub(crate) fn frame(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => VkError::SurfaceOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost,
            result => VkError::Frame { what, result },
        }
    }
}

pub(crate) trait ResultExt<T> {
    /// Setup-time failure of a create/allocate call.
    fn creating(self, what: &'static str) -> VkResult<T>;
    /// Failure inside the per-frame loop.
    fn in_frame(self, what: &'static str) -> VkResult<T>;
}

impl<T> ResultExt<T> for Result<T, vk::Result> {
    fn creating(self, what: &'static str) -> VkResult<T> {
        self.map_err(|result| match result {
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost,
            result => VkError::ResourceCreation { what, result },
        })
    }

    fn in_frame(self, what: &'static str) -> VkResult<T> {
        self.map_err(|result| VkError::frame(what, result))
    }
}
