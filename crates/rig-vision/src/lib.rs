//! rig-vision: two-camera capture, side-by-side compositing and single-stage
//! analysis (foreground extraction or edge detection)

mod types;
pub use types::{Frame, PixelFormat, WHITE};

mod error;
pub use error::{Error, Result};

mod traits;
pub use traits::{CameraSource, DeviceInfo, DeviceManager};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{
    MockCamera, MockDeviceManager, MockDeviceSpec, MockEvent, MockFault, MockJournal, MockPattern,
};

#[cfg(feature = "opencv")]
mod opencv_backend;
#[cfg(feature = "opencv")]
pub use opencv_backend::{OpenCvCamera, OpenCvDeviceManager};

pub mod io;

pub mod store;

pub mod compose;

/// Largest-dark-region extraction on a white background
pub mod foreground;

pub mod edges;

pub mod config;

pub mod pipeline;
pub use pipeline::{Orchestrator, PipelineState, RunOutcome, RunReport, RunSummary};
