//! Single-shot capture pipeline: discover, open, stream, capture, release,
//! composite, analyze.
//!
//! Device-level failures end the run with a logged outcome and released
//! hardware. Image-processing failures after capture are fatal and come back
//! as `Err`, again only after the devices are released.

use crate::compose::{CompositeImage, ImageCompositor};
use crate::config::{AnalysisStage, CaptureMode, RigConfig};
use crate::edges::EdgeDetector;
use crate::foreground::ForegroundExtractor;
use crate::store::{CameraRole, CaptureStore, ExtractedArtifact, FrameRecord};
use crate::{CameraSource, DeviceManager, Error, Frame, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Cameras the rig needs; there is no single-camera mode.
pub const REQUIRED_DEVICES: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    DevicesDiscovered,
    DevicesOpened,
    Streaming,
    Captured,
    Composited,
    Analyzed,
    Done,
    NoDevices,
    InsufficientDevices,
    DeviceOpenFailed,
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenFailure {
    pub role: CameraRole,
    pub index: u32,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    NoDevices,
    InsufficientDevices { found: usize },
    DeviceOpenFailed(Vec<OpenFailure>),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::NoDevices => write!(f, "{}", Error::NoDevices),
            AbortReason::InsufficientDevices { found } => write!(
                f,
                "{}",
                Error::InsufficientDevices {
                    found: *found,
                    required: REQUIRED_DEVICES
                }
            ),
            AbortReason::DeviceOpenFailed(failures) => {
                let parts: Vec<String> = failures
                    .iter()
                    .map(|o| format!("{} (device {}): {}", o.role, o.index, o.reason))
                    .collect();
                write!(f, "required cameras could not be opened: {}", parts.join("; "))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// Both frames captured and composited. `artifact` is `None` when the
    /// foreground stage found no contour.
    Completed {
        camera1: FrameRecord,
        camera2: FrameRecord,
        composite: CompositeImage,
        artifact: Option<ExtractedArtifact>,
    },
    /// At least one camera delivered no frame; nothing was composited.
    PartialCapture {
        camera1: Option<FrameRecord>,
        camera2: Option<FrameRecord>,
    },
    /// Both frames captured but too far apart in time to pair.
    SkewExceeded {
        camera1: FrameRecord,
        camera2: FrameRecord,
        skew: Duration,
    },
    Aborted(AbortReason),
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub states: Vec<PipelineState>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Init)
    }

    pub fn summary(&self) -> RunSummary {
        let frame = |r: &FrameRecord| FrameSummary {
            camera: r.role.id(),
            index: r.sequence_index,
            path: r.path.display().to_string(),
        };
        let mut summary = RunSummary {
            status: "",
            states: self.states.clone(),
            frames: Vec::new(),
            composite: None,
            artifact: None,
            detail: None,
        };
        match &self.outcome {
            RunOutcome::Completed {
                camera1,
                camera2,
                composite,
                artifact,
            } => {
                summary.status = "completed";
                summary.frames = vec![frame(camera1), frame(camera2)];
                summary.composite = Some(composite.path.display().to_string());
                summary.artifact = artifact.as_ref().map(|a| a.path().display().to_string());
                if artifact.is_none() {
                    summary.detail = Some("no foreground contour".to_string());
                }
            }
            RunOutcome::PartialCapture { camera1, camera2 } => {
                summary.status = "partial_capture";
                summary.frames = camera1.iter().chain(camera2.iter()).map(frame).collect();
                let missing: Vec<String> = [(CameraRole::Camera1, camera1), (CameraRole::Camera2, camera2)]
                    .iter()
                    .filter(|(_, r)| r.is_none())
                    .map(|(role, _)| role.to_string())
                    .collect();
                summary.detail = Some(format!("no frame from {}", missing.join(", ")));
            }
            RunOutcome::SkewExceeded {
                camera1,
                camera2,
                skew,
            } => {
                summary.status = "skew_exceeded";
                summary.frames = vec![frame(camera1), frame(camera2)];
                summary.detail = Some(format!("capture skew {} ms", skew.as_millis()));
            }
            RunOutcome::Aborted(reason) => {
                summary.status = "aborted";
                summary.detail = Some(reason.to_string());
            }
        }
        summary
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FrameSummary {
    pub camera: u8,
    pub index: u32,
    pub path: String,
}

/// Serializable digest of a run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub status: &'static str,
    pub states: Vec<PipelineState>,
    pub frames: Vec<FrameSummary>,
    pub composite: Option<String>,
    pub artifact: Option<String>,
    pub detail: Option<String>,
}

/// Exclusive ownership of one opened camera for the duration of a run.
/// Dropping the session stops the stream (if started) and closes the device.
struct DeviceSession {
    role: CameraRole,
    camera: Box<dyn CameraSource>,
    streaming: bool,
    released: bool,
}

impl DeviceSession {
    fn new(role: CameraRole, camera: Box<dyn CameraSource>) -> Self {
        Self {
            role,
            camera,
            streaming: false,
            released: false,
        }
    }

    fn start(&mut self) {
        match self.camera.start_stream() {
            Ok(()) => self.streaming = true,
            Err(e) => warn!(camera = %self.role, error = %e, "stream start failed"),
        }
    }

    /// One frame, or `None` after logging why not.
    fn acquire(&mut self, timeout: Duration) -> Option<Frame> {
        if !self.streaming {
            warn!(camera = %self.role, "not streaming, skipping capture");
            return None;
        }
        match self.camera.acquire_frame(timeout) {
            Ok(frame) => {
                info!(
                    camera = %self.role,
                    width = frame.width,
                    height = frame.height,
                    "frame acquired"
                );
                Some(frame)
            }
            Err(e) => {
                if e.is_frame_level() {
                    warn!(camera = %self.role, error = %e, "no frame from camera");
                } else {
                    error!(camera = %self.role, error = %e, "camera failed during capture");
                }
                None
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.streaming {
            if let Err(e) = self.camera.stop_stream() {
                warn!(camera = %self.role, error = %e, "stream stop failed");
            }
            self.streaming = false;
        }
        match self.camera.close() {
            Ok(()) => info!(camera = %self.role, device = self.camera.info().index, "device closed"),
            Err(e) => warn!(camera = %self.role, error = %e, "device close failed"),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct Orchestrator<M: DeviceManager> {
    manager: M,
    config: RigConfig,
}

impl<M: DeviceManager> Orchestrator<M> {
    pub fn new(manager: M, config: RigConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn run(&mut self) -> Result<RunReport> {
        self.config.validate()?;
        let mut states = vec![PipelineState::Init];
        let store = self.config.store();
        store.prepare(self.config.analysis.stage.artifact_kind())?;

        let devices = self.manager.enumerate()?;
        info!(count = devices.len(), "devices enumerated");
        if devices.is_empty() {
            error!("no camera devices found");
            return Ok(abort(states, PipelineState::NoDevices, AbortReason::NoDevices));
        }
        if devices.len() < REQUIRED_DEVICES {
            error!(found = devices.len(), required = REQUIRED_DEVICES, "not enough cameras");
            return Ok(abort(
                states,
                PipelineState::InsufficientDevices,
                AbortReason::InsufficientDevices {
                    found: devices.len(),
                },
            ));
        }
        enter(&mut states, PipelineState::DevicesDiscovered);

        let opened1 = self.open_role(CameraRole::Camera1);
        let opened2 = self.open_role(CameraRole::Camera2);
        let (mut cam1, mut cam2) = match (opened1, opened2) {
            (Ok(a), Ok(b)) => (a, b),
            (r1, r2) => {
                // whichever session did open is closed on drop
                let failures: Vec<OpenFailure> =
                    [r1.err(), r2.err()].into_iter().flatten().collect();
                error!("required cameras could not be opened, aborting");
                return Ok(abort(
                    states,
                    PipelineState::DeviceOpenFailed,
                    AbortReason::DeviceOpenFailed(failures),
                ));
            }
        };
        enter(&mut states, PipelineState::DevicesOpened);

        cam1.start();
        cam2.start();
        enter(&mut states, PipelineState::Streaming);

        let index1 = store.next_index(CameraRole::Camera1)?;
        let index2 = store.next_index(CameraRole::Camera2)?;
        let timeout = self.config.capture.timeout();
        let (frame1, frame2) = match self.config.capture.mode {
            CaptureMode::Sequential => {
                let f1 = cam1.acquire(timeout);
                let f2 = cam2.acquire(timeout);
                (f1, f2)
            }
            CaptureMode::Concurrent => acquire_concurrently(&mut cam1, &mut cam2, timeout),
        };
        let rec1 = persist(&store, CameraRole::Camera1, index1, frame1)?;
        let rec2 = persist(&store, CameraRole::Camera2, index2, frame2)?;
        enter(&mut states, PipelineState::Captured);

        drop(cam1);
        drop(cam2);
        info!("devices released");

        let (rec1, rec2) = match (rec1, rec2) {
            (Some(a), Some(b)) => (a, b),
            (camera1, camera2) => {
                warn!(
                    camera1 = camera1.is_some(),
                    camera2 = camera2.is_some(),
                    "capture incomplete, skipping composite and analysis"
                );
                return Ok(RunReport {
                    states,
                    outcome: RunOutcome::PartialCapture { camera1, camera2 },
                });
            }
        };

        if let Some(limit_ms) = self.config.capture.max_skew_ms {
            if let Some(skew) = capture_skew(&rec1.frame, &rec2.frame) {
                if skew > Duration::from_millis(limit_ms) {
                    warn!(
                        skew_ms = skew.as_millis() as u64,
                        limit_ms, "frame pair too far apart, skipping composite"
                    );
                    return Ok(RunReport {
                        states,
                        outcome: RunOutcome::SkewExceeded {
                            camera1: rec1,
                            camera2: rec2,
                            skew,
                        },
                    });
                }
            }
        }

        let composite = ImageCompositor::new(&store).merge(&rec1.path, &rec2.path)?;
        enter(&mut states, PipelineState::Composited);

        let artifact = analyze(&store, &self.config, &composite)?;
        enter(&mut states, PipelineState::Analyzed);
        enter(&mut states, PipelineState::Done);

        Ok(RunReport {
            states,
            outcome: RunOutcome::Completed {
                camera1: rec1,
                camera2: rec2,
                composite,
                artifact,
            },
        })
    }

    fn open_role(&mut self, role: CameraRole) -> std::result::Result<DeviceSession, OpenFailure> {
        let index = self.config.cameras.index_for(role);
        match self.manager.open(index) {
            Ok(camera) => {
                info!(camera = %role, device = index, name = %camera.info().name, "device opened");
                Ok(DeviceSession::new(role, camera))
            }
            Err(e) => {
                error!(camera = %role, device = index, error = %e, "device open failed");
                Err(OpenFailure {
                    role,
                    index,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Run the configured analysis stage on a stored composite.
pub fn analyze(
    store: &CaptureStore,
    config: &RigConfig,
    composite: &CompositeImage,
) -> Result<Option<ExtractedArtifact>> {
    let a = &config.analysis;
    match a.stage {
        AnalysisStage::Foreground => {
            ForegroundExtractor::new(store, a.cutoff).extract(&composite.path)
        }
        AnalysisStage::Edges => EdgeDetector::new(store, a.edge_low, a.edge_high)
            .detect(&composite.path)
            .map(Some),
    }
}

fn enter(states: &mut Vec<PipelineState>, state: PipelineState) {
    info!(state = ?state, "pipeline state");
    states.push(state);
}

fn abort(mut states: Vec<PipelineState>, failure: PipelineState, reason: AbortReason) -> RunReport {
    enter(&mut states, failure);
    enter(&mut states, PipelineState::Aborted);
    RunReport {
        states,
        outcome: RunOutcome::Aborted(reason),
    }
}

fn persist(
    store: &CaptureStore,
    role: CameraRole,
    index: u32,
    frame: Option<Frame>,
) -> Result<Option<FrameRecord>> {
    match frame {
        Some(f) => store.persist(role, index, &f).map(Some),
        None => Ok(None),
    }
}

fn acquire_concurrently(
    cam1: &mut DeviceSession,
    cam2: &mut DeviceSession,
    timeout: Duration,
) -> (Option<Frame>, Option<Frame>) {
    std::thread::scope(|s| {
        let h1 = s.spawn(|| cam1.acquire(timeout));
        let h2 = s.spawn(|| cam2.acquire(timeout));
        (
            joined(h1.join(), CameraRole::Camera1),
            joined(h2.join(), CameraRole::Camera2),
        )
    })
}

fn joined(result: std::thread::Result<Option<Frame>>, role: CameraRole) -> Option<Frame> {
    result.unwrap_or_else(|_| {
        error!(camera = %role, "capture thread panicked");
        None
    })
}

fn capture_skew(a: &Frame, b: &Frame) -> Option<Duration> {
    let (ta, tb) = (a.ts?, b.ts?);
    let diff = (ta - tb).abs();
    Some(Duration::from_micros(diff.whole_microseconds().max(0) as u64))
}
