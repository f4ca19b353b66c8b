use crate::{Frame, Result};
use std::time::Duration;

/// One entry of a device enumeration. `index` is the 1-based position in the list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub driver: String,
}

/// Discovers and opens camera devices for a backend.
pub trait DeviceManager {
    /// List connected devices.
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Open the device at a 1-based enumeration index.
    fn open(&mut self, index: u32) -> Result<Box<dyn CameraSource>>;
}

/// An opened camera. Acquisition blocks until a frame arrives, the device
/// fails, or the timeout elapses.
pub trait CameraSource: Send {
    fn info(&self) -> &DeviceInfo;

    fn start_stream(&mut self) -> Result<()>;

    /// Acquire a single frame in the canonical `Rgb8` layout.
    fn acquire_frame(&mut self, timeout: Duration) -> Result<Frame>;

    fn stop_stream(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
