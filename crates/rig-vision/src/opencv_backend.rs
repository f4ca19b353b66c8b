use crate::{CameraSource, DeviceInfo, DeviceManager, Error, Frame, PixelFormat, Result};
use opencv::prelude::*;
use opencv::{core, imgproc, videoio};
use std::time::Duration;
use time::OffsetDateTime;

fn backend(e: opencv::Error) -> Error {
    Error::Backend(e.to_string())
}

/// Device manager over `videoio` capture indices. Enumeration probes the
/// first `max_probe` indices; 1-based device index `i` maps to capture index `i - 1`.
pub struct OpenCvDeviceManager {
    max_probe: u32,
}

impl OpenCvDeviceManager {
    pub fn new(max_probe: u32) -> Self {
        Self { max_probe }
    }
}

impl Default for OpenCvDeviceManager {
    fn default() -> Self {
        Self::new(8)
    }
}

impl DeviceManager for OpenCvDeviceManager {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        let mut found = Vec::new();
        for idx in 0..self.max_probe {
            let Ok(mut cap) = videoio::VideoCapture::new(idx as i32, videoio::CAP_ANY) else {
                continue;
            };
            if cap.is_opened().unwrap_or(false) {
                found.push(DeviceInfo {
                    index: found.len() as u32 + 1,
                    name: format!("videoio:{idx}"),
                    driver: "opencv".to_string(),
                });
            }
            let _ = cap.release();
        }
        Ok(found)
    }

    fn open(&mut self, index: u32) -> Result<Box<dyn CameraSource>> {
        let cap_index = index
            .checked_sub(1)
            .ok_or_else(|| Error::NotFound(format!("device index {index}")))?;
        let open_err = |reason: String| Error::DeviceOpen { index, reason };
        let cap = videoio::VideoCapture::new(cap_index as i32, videoio::CAP_ANY)
            .map_err(|e| open_err(e.to_string()))?;
        let opened = cap.is_opened().map_err(|e| open_err(e.to_string()))?;
        if !opened {
            return Err(open_err("capture did not open".to_string()));
        }
        Ok(Box::new(OpenCvCamera {
            cap,
            info: DeviceInfo {
                index,
                name: format!("videoio:{cap_index}"),
                driver: "opencv".to_string(),
            },
            streaming: false,
        }))
    }
}

pub struct OpenCvCamera {
    cap: videoio::VideoCapture,
    info: DeviceInfo,
    streaming: bool,
}

impl CameraSource for OpenCvCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(&mut self) -> Result<()> {
        // videoio streams as soon as the capture is open
        self.streaming = true;
        Ok(())
    }

    fn acquire_frame(&mut self, timeout: Duration) -> Result<Frame> {
        if !self.streaming {
            return Err(Error::Acquisition("stream not started".to_string()));
        }
        let timeout_ms = timeout.as_millis() as u64;
        // Not every capture backend honors the property; ignore a refusal.
        let _ = self
            .cap
            .set(videoio::CAP_PROP_READ_TIMEOUT_MSEC, timeout_ms as f64);

        let mut mat = core::Mat::default();
        let started = std::time::Instant::now();
        let ok = self
            .cap
            .read(&mut mat)
            .map_err(|e| Error::Acquisition(e.to_string()))?;
        if !ok || mat.empty() {
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(timeout_ms));
            }
            return Err(Error::Acquisition("empty frame".into()));
        }

        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        let code = match mat.channels() {
            1 => imgproc::COLOR_GRAY2RGB,
            3 => imgproc::COLOR_BGR2RGB,
            4 => imgproc::COLOR_BGRA2RGB,
            n => return Err(Error::Conversion(format!("unsupported channel count {n}"))),
        };
        let mut rgb = core::Mat::default();
        imgproc::cvt_color(&mat, &mut rgb, code, 0).map_err(|e| Error::Conversion(e.to_string()))?;

        let data = rgb
            .data_bytes()
            .map_err(|e| Error::Conversion(e.to_string()))?
            .to_vec();
        let frame = Frame {
            width,
            height,
            pixel_format: PixelFormat::Rgb8,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        };
        // validates the buffer length
        frame.to_rgb8()
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.cap.release().map_err(backend)
    }
}
