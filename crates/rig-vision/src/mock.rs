use crate::{CameraSource, DeviceInfo, DeviceManager, Error, Frame, PixelFormat, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

/// Synthetic scene rendered by a mock camera.
#[derive(Clone, Debug, PartialEq)]
pub enum MockPattern {
    Solid([u8; 3]),
    /// Diagonal gray ramp.
    Ramp,
    /// A filled rectangle on a flat background.
    Rect {
        background: [u8; 3],
        fill: [u8; 3],
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    },
}

impl MockPattern {
    fn render(&self, width: u32, height: u32) -> Frame {
        match *self {
            MockPattern::Solid(rgb) => Frame::solid_rgb(width, height, rgb),
            MockPattern::Ramp => Frame::from_rgb_fn(width, height, |x, y| {
                let v = ((x + y) % 256) as u8;
                [v, v, v]
            }),
            MockPattern::Rect {
                background,
                fill,
                x,
                y,
                w,
                h,
            } => Frame::from_rgb_fn(width, height, |px, py| {
                if px >= x && px < x + w && py >= y && py < y + h {
                    fill
                } else {
                    background
                }
            }),
        }
    }
}

/// Failure injected into a mock device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockFault {
    Open,
    Acquire,
    /// The device delivers a truncated raw buffer.
    Conversion,
}

#[derive(Clone, Debug)]
pub struct MockDeviceSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pattern: MockPattern,
    pub raw_format: PixelFormat,
    pub fault: Option<MockFault>,
    pub latency: Duration,
}

impl MockDeviceSpec {
    pub fn new(name: &str, width: u32, height: u32, pattern: MockPattern) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            pattern,
            raw_format: PixelFormat::Bgr8,
            fault: None,
            latency: Duration::ZERO,
        }
    }

    pub fn raw_format(mut self, format: PixelFormat) -> Self {
        self.raw_format = format;
        self
    }

    pub fn fault(mut self, fault: MockFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Hardware-visible events, in the order the mock devices saw them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MockEvent {
    Opened(u32),
    StreamOn(u32),
    Acquired(u32),
    AcquireFailed(u32),
    StreamOff(u32),
    Closed(u32),
}

/// Shared handle on the event log of a [`MockDeviceManager`].
#[derive(Clone, Debug, Default)]
pub struct MockJournal(Arc<Mutex<Vec<MockEvent>>>);

impl MockJournal {
    fn push(&self, event: MockEvent) {
        let mut events = match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event);
    }

    pub fn events(&self) -> Vec<MockEvent> {
        match self.0.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Devices that were opened but never closed.
    pub fn leaked(&self) -> Vec<u32> {
        let events = self.events();
        let mut open: Vec<u32> = Vec::new();
        for e in events {
            match e {
                MockEvent::Opened(i) => open.push(i),
                MockEvent::Closed(i) => open.retain(|&o| o != i),
                _ => {}
            }
        }
        open
    }
}

/// In-process device backend with scripted cameras.
pub struct MockDeviceManager {
    devices: Vec<MockDeviceSpec>,
    journal: MockJournal,
}

impl MockDeviceManager {
    pub fn new(devices: Vec<MockDeviceSpec>) -> Self {
        Self {
            devices,
            journal: MockJournal::default(),
        }
    }

    /// Two 640x480 cameras looking at a dark part on a bright table, split across both views.
    pub fn demo_rig() -> Self {
        let bright = [220, 220, 220];
        let dark = [20, 24, 30];
        Self::new(vec![
            MockDeviceSpec::new(
                "mock-right",
                640,
                480,
                MockPattern::Rect {
                    background: bright,
                    fill: dark,
                    x: 0,
                    y: 160,
                    w: 120,
                    h: 140,
                },
            ),
            MockDeviceSpec::new(
                "mock-left",
                640,
                480,
                MockPattern::Rect {
                    background: bright,
                    fill: dark,
                    x: 400,
                    y: 160,
                    w: 240,
                    h: 140,
                },
            ),
        ])
    }

    pub fn journal(&self) -> MockJournal {
        self.journal.clone()
    }
}

impl DeviceManager for MockDeviceManager {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceInfo {
                index: i as u32 + 1,
                name: d.name.clone(),
                driver: "mock".to_string(),
            })
            .collect())
    }

    fn open(&mut self, index: u32) -> Result<Box<dyn CameraSource>> {
        let spec = index
            .checked_sub(1)
            .and_then(|i| self.devices.get(i as usize))
            .ok_or_else(|| Error::NotFound(format!("mock device {index}")))?;
        if spec.fault == Some(MockFault::Open) {
            return Err(Error::DeviceOpen {
                index,
                reason: "device busy".to_string(),
            });
        }
        self.journal.push(MockEvent::Opened(index));
        Ok(Box::new(MockCamera {
            info: DeviceInfo {
                index,
                name: spec.name.clone(),
                driver: "mock".to_string(),
            },
            spec: spec.clone(),
            streaming: false,
            counter: 0,
            journal: self.journal.clone(),
        }))
    }
}

pub struct MockCamera {
    info: DeviceInfo,
    spec: MockDeviceSpec,
    streaming: bool,
    counter: u64,
    journal: MockJournal,
}

impl MockCamera {
    fn raw_frame(&self) -> Frame {
        let rgb = self.spec.pattern.render(self.spec.width, self.spec.height);
        let data: Vec<u8> = match self.spec.raw_format {
            PixelFormat::Rgb8 => rgb.data,
            PixelFormat::Bgr8 => rgb
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Rgba8 => rgb
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            PixelFormat::Bgra8 => rgb
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0], 255])
                .collect(),
            PixelFormat::Gray8 => rgb.data.chunks_exact(3).map(|p| p[1]).collect(),
        };
        Frame {
            width: self.spec.width,
            height: self.spec.height,
            pixel_format: self.spec.raw_format,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        }
    }
}

impl CameraSource for MockCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(&mut self) -> Result<()> {
        self.streaming = true;
        self.journal.push(MockEvent::StreamOn(self.info.index));
        Ok(())
    }

    fn acquire_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let result = self.acquire_inner(timeout);
        let event = match &result {
            Ok(_) => MockEvent::Acquired(self.info.index),
            Err(_) => MockEvent::AcquireFailed(self.info.index),
        };
        self.journal.push(event);
        result
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        self.journal.push(MockEvent::StreamOff(self.info.index));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.journal.push(MockEvent::Closed(self.info.index));
        Ok(())
    }
}

impl MockCamera {
    fn acquire_inner(&mut self, timeout: Duration) -> Result<Frame> {
        if !self.streaming {
            return Err(Error::Acquisition("stream not started".to_string()));
        }
        if self.spec.latency > timeout {
            std::thread::sleep(timeout);
            return Err(Error::Timeout(timeout.as_millis() as u64));
        }
        if !self.spec.latency.is_zero() {
            std::thread::sleep(self.spec.latency);
        }
        self.counter += 1;
        tracing::trace!(device = %self.info.name, frame = self.counter, "mock acquisition");
        match self.spec.fault {
            Some(MockFault::Acquire) => Err(Error::Acquisition(format!(
                "{}: no image delivered",
                self.info.name
            ))),
            Some(MockFault::Conversion) => {
                let mut raw = self.raw_frame();
                raw.data.truncate(raw.data.len() / 2);
                raw.to_rgb8()
            }
            _ => self.raw_frame().to_rgb8(),
        }
    }
}
