use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("unsupported input: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{} already exists", .0.display())]
    Exists(PathBuf),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("no camera devices found")]
    NoDevices,
    #[error("at least {required} cameras are required, found {found}")]
    InsufficientDevices { found: usize, required: usize },
    #[error("failed to open device {index}: {reason}")]
    DeviceOpen { index: u32, reason: String },
    #[error("frame acquisition failed: {0}")]
    Acquisition(String),
    #[error("frame conversion failed: {0}")]
    Conversion(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("cannot encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Per-frame errors degrade a camera's result to "no frame" instead of ending the run.
    pub fn is_frame_level(&self) -> bool {
        matches!(
            self,
            Error::Acquisition(_) | Error::Conversion(_) | Error::Timeout(_)
        )
    }
}
