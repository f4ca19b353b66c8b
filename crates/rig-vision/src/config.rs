use crate::io::ImageFormat;
use crate::store::{ArtifactKind, CameraRole, CaptureStore, IndexPolicy};
use crate::{edges, foreground, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rig configuration. Every field defaults to the deployment constants, so an
/// empty YAML document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigConfig {
    pub output_root: PathBuf,
    pub image_format: ImageFormat,
    pub cameras: CameraWiring,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
}

/// Role to device-index wiring (1-based enumeration indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraWiring {
    pub camera1: u32,
    pub camera2: u32,
}

impl Default for CameraWiring {
    fn default() -> Self {
        Self {
            camera1: 2,
            camera2: 1,
        }
    }
}

impl CameraWiring {
    pub fn index_for(&self, role: CameraRole) -> u32 {
        match role {
            CameraRole::Camera1 => self.camera1,
            CameraRole::Camera2 => self.camera2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Camera-1 then camera-2 on the calling thread.
    #[default]
    Sequential,
    /// One scoped thread per camera, joined before compositing.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub timeout_ms: u64,
    /// Reject a frame pair whose capture times differ by more than this.
    pub max_skew_ms: Option<u64>,
    pub index_policy: IndexPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Sequential,
            timeout_ms: 5000,
            max_skew_ms: None,
            index_policy: IndexPolicy::CountFiles,
        }
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    #[default]
    Foreground,
    Edges,
}

impl AnalysisStage {
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            AnalysisStage::Foreground => ArtifactKind::Extracted,
            AnalysisStage::Edges => ArtifactKind::Edges,
        }
    }
}

impl std::str::FromStr for AnalysisStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "foreground" | "extract" => Ok(AnalysisStage::Foreground),
            "edges" | "edge" => Ok(AnalysisStage::Edges),
            other => Err(Error::Config(format!("unknown analysis stage: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub stage: AnalysisStage,
    /// Luminance cutoff; pixels at or below are foreground.
    pub cutoff: u8,
    pub edge_low: f32,
    pub edge_high: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stage: AnalysisStage::Foreground,
            cutoff: foreground::DEFAULT_CUTOFF,
            edge_low: edges::DEFAULT_LOW_THRESHOLD,
            edge_high: edges::DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("captures"),
            image_format: ImageFormat::default(),
            cameras: CameraWiring::default(),
            capture: CaptureConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl RigConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let cfg = Self::from_yaml_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let (c1, c2) = (self.cameras.camera1, self.cameras.camera2);
        if c1 == 0 || c2 == 0 {
            return Err(Error::Config("device indices are 1-based".to_string()));
        }
        if c1 == c2 {
            return Err(Error::Config(format!(
                "camera1 and camera2 both wired to device {c1}"
            )));
        }
        if let ImageFormat::Jpeg { quality } = self.image_format {
            if !(1..=100).contains(&quality) {
                return Err(Error::Config(format!("jpeg quality {quality} not in 1..=100")));
            }
        }
        let a = &self.analysis;
        if !a.edge_low.is_finite() || !a.edge_high.is_finite() || a.edge_low > a.edge_high {
            return Err(Error::Config(format!(
                "edge thresholds must satisfy low <= high, got {} / {}",
                a.edge_low, a.edge_high
            )));
        }
        if self.capture.timeout_ms == 0 {
            return Err(Error::Config("capture timeout must be positive".to_string()));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(Error::Config("output_root is empty".to_string()));
        }
        Ok(())
    }

    pub fn store(&self) -> CaptureStore {
        CaptureStore::new(
            self.output_root.clone(),
            self.image_format,
            self.capture.index_policy,
        )
    }
}
