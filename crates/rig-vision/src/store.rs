use crate::io::{self, ImageFormat};
use crate::{Error, Frame, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

/// Which physical position on the rig a camera occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CameraRole {
    Camera1,
    Camera2,
}

impl CameraRole {
    pub const ALL: [CameraRole; 2] = [CameraRole::Camera1, CameraRole::Camera2];

    pub fn id(self) -> u8 {
        match self {
            CameraRole::Camera1 => 1,
            CameraRole::Camera2 => 2,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            CameraRole::Camera1 => "kamera1",
            CameraRole::Camera2 => "kamera2",
        }
    }
}

impl std::fmt::Display for CameraRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera-{}", self.id())
    }
}

/// How per-camera sequence indices are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolicy {
    /// 1 + number of stored frames. Deleted files lower later indices.
    #[default]
    CountFiles,
    /// Last issued index kept in a `.sequence` file next to the frames.
    Durable,
}

/// Derived artifacts written after capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ArtifactKind {
    Merged,
    Extracted,
    Edges,
}

impl ArtifactKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Merged => "merged",
            ArtifactKind::Extracted => "extracted",
            ArtifactKind::Edges => "edges",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Merged => "merged",
            ArtifactKind::Extracted => "cropped",
            ArtifactKind::Edges => "edges",
        }
    }
}

/// A captured frame as persisted by the store. Never modified after creation.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub role: CameraRole,
    pub sequence_index: u32,
    pub timestamp: OffsetDateTime,
    pub frame: Frame,
    pub path: PathBuf,
}

/// Output of the analysis stage, derived from one composite.
#[derive(Clone, Debug)]
pub enum ExtractedArtifact {
    /// Source pixels inside the selected region, white everywhere else.
    ForegroundCrop {
        frame: Frame,
        path: PathBuf,
        derived_from: PathBuf,
    },
    /// Single-channel edge map.
    EdgeMap {
        frame: Frame,
        path: PathBuf,
        derived_from: PathBuf,
    },
}

impl ExtractedArtifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ExtractedArtifact::ForegroundCrop { .. } => ArtifactKind::Extracted,
            ExtractedArtifact::EdgeMap { .. } => ArtifactKind::Edges,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ExtractedArtifact::ForegroundCrop { path, .. }
            | ExtractedArtifact::EdgeMap { path, .. } => path,
        }
    }

    pub fn frame(&self) -> &Frame {
        match self {
            ExtractedArtifact::ForegroundCrop { frame, .. }
            | ExtractedArtifact::EdgeMap { frame, .. } => frame,
        }
    }
}

const SEQUENCE_FILE: &str = ".sequence";

/// Append-only artifact store rooted at one directory.
#[derive(Clone, Debug)]
pub struct CaptureStore {
    root: PathBuf,
    format: ImageFormat,
    policy: IndexPolicy,
}

/// `YYYYMMDD_HHMMSS`
pub fn file_stamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    ts.format(fmt)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>, format: ImageFormat, policy: IndexPolicy) -> Self {
        Self {
            root: root.into(),
            format,
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn camera_dir(&self, role: CameraRole) -> PathBuf {
        self.root.join(role.dir_name())
    }

    pub fn artifact_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Create the camera and merged directories plus the one analysis directory in use.
    pub fn prepare(&self, analysis: ArtifactKind) -> Result<()> {
        let dirs = [
            self.camera_dir(CameraRole::Camera1),
            self.camera_dir(CameraRole::Camera2),
            self.artifact_dir(ArtifactKind::Merged),
            self.artifact_dir(analysis),
        ];
        for dir in dirs {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    /// Number of stored frames for `role`, i.e. files carrying the store's extension.
    pub fn count_frames(&self, role: CameraRole) -> Result<u32> {
        let dir = self.camera_dir(role);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(format!("{}: {e}", dir.display()))),
        };
        let ext = self.format.extension();
        let mut count = 0u32;
        for entry in entries {
            let path = entry.map_err(|e| Error::Io(e.to_string()))?.path();
            let matches = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case(ext))
                .unwrap_or(false);
            if matches && path.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Index the next frame of `role` will carry. Recomputed on every call.
    pub fn next_index(&self, role: CameraRole) -> Result<u32> {
        match self.policy {
            IndexPolicy::CountFiles => Ok(self.count_frames(role)? + 1),
            IndexPolicy::Durable => match self.read_sequence(role)? {
                Some(last) => Ok(last + 1),
                None => Ok(self.count_frames(role)? + 1),
            },
        }
    }

    /// Encode and write a captured frame as `kamera{id}_{index}_{stamp}`.
    pub fn persist(&self, role: CameraRole, index: u32, frame: &Frame) -> Result<FrameRecord> {
        let dir = self.camera_dir(role);
        ensure_dir(&dir)?;
        let now = local_now();
        let stem = format!("kamera{}_{}_{}", role.id(), index, file_stamp(now));
        let path = io::write_frame_unique(&dir, &stem, frame, self.format)?;
        if self.policy == IndexPolicy::Durable {
            self.write_sequence(role, index)?;
        }
        tracing::info!(camera = %role, index, path = %path.display(), "frame saved");
        Ok(FrameRecord {
            role,
            sequence_index: index,
            timestamp: frame.ts.unwrap_or(now),
            frame: frame.clone(),
            path,
        })
    }

    /// Write a derived artifact (`merged_*`, `cropped_*`, `edges_*`).
    pub fn persist_artifact(&self, kind: ArtifactKind, frame: &Frame) -> Result<PathBuf> {
        let dir = self.artifact_dir(kind);
        ensure_dir(&dir)?;
        let stem = format!("{}_{}", kind.prefix(), file_stamp(local_now()));
        io::write_frame_unique(&dir, &stem, frame, self.format)
    }

    fn sequence_path(&self, role: CameraRole) -> PathBuf {
        self.camera_dir(role).join(SEQUENCE_FILE)
    }

    fn read_sequence(&self, role: CameraRole) -> Result<Option<u32>> {
        let path = self.sequence_path(role);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(format!("{}: {e}", path.display()))),
        };
        raw.trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| Error::Io(format!("corrupt {}: {e}", path.display())))
    }

    fn write_sequence(&self, role: CameraRole, index: u32) -> Result<()> {
        let path = self.sequence_path(role);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, format!("{index}\n"))
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::Io(format!("{}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path, policy: IndexPolicy) -> CaptureStore {
        CaptureStore::new(root, ImageFormat::default(), policy)
    }

    #[test]
    fn next_index_counts_existing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::CountFiles);
        let cam1 = s.camera_dir(CameraRole::Camera1);
        fs::create_dir_all(&cam1).unwrap();
        for i in 1..=3 {
            fs::write(cam1.join(format!("kamera1_{i}_20240101_000000.jpg")), b"x").unwrap();
        }
        fs::write(cam1.join("notes.txt"), b"ignored").unwrap();
        assert_eq!(s.next_index(CameraRole::Camera1).unwrap(), 4);
        assert_eq!(s.next_index(CameraRole::Camera2).unwrap(), 1);
    }

    #[test]
    fn persist_names_file_after_role_index_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::CountFiles);
        let frame = Frame::solid_rgb(8, 6, [128, 128, 128]);
        let idx = s.next_index(CameraRole::Camera2).unwrap();
        let rec = s.persist(CameraRole::Camera2, idx, &frame).unwrap();
        let name = rec.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("kamera2_1_"), "{name}");
        assert!(name.ends_with(".jpg"));
        // kamera2_1_YYYYMMDD_HHMMSS.jpg
        assert_eq!(name.len(), "kamera2_1_".len() + 15 + 4);
        assert_eq!(rec.sequence_index, 1);
        assert_eq!(s.next_index(CameraRole::Camera2).unwrap(), 2);
    }

    #[test]
    fn indices_are_monotonic_within_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::CountFiles);
        let frame = Frame::solid_rgb(2, 2, [0, 0, 0]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let idx = s.next_index(CameraRole::Camera1).unwrap();
            s.persist(CameraRole::Camera1, idx, &frame).unwrap();
            seen.push(idx);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn deleted_files_lower_count_based_indices_but_not_durable_ones() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::solid_rgb(2, 2, [0, 0, 0]);
        for policy in [IndexPolicy::CountFiles, IndexPolicy::Durable] {
            let root = dir.path().join(format!("{policy:?}"));
            let s = store(&root, policy);
            let mut last = None;
            for _ in 0..3 {
                let idx = s.next_index(CameraRole::Camera1).unwrap();
                last = Some(s.persist(CameraRole::Camera1, idx, &frame).unwrap());
            }
            fs::remove_file(&last.unwrap().path).unwrap();
            let expected = match policy {
                IndexPolicy::CountFiles => 3,
                IndexPolicy::Durable => 4,
            };
            assert_eq!(s.next_index(CameraRole::Camera1).unwrap(), expected, "{policy:?}");
        }
    }

    #[test]
    fn durable_policy_bootstraps_from_file_count() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::Durable);
        let cam = s.camera_dir(CameraRole::Camera1);
        fs::create_dir_all(&cam).unwrap();
        fs::write(cam.join("kamera1_1_20240101_000000.jpg"), b"x").unwrap();
        assert_eq!(s.next_index(CameraRole::Camera1).unwrap(), 2);
        assert!(!cam.join(SEQUENCE_FILE).exists());
    }

    #[test]
    fn corrupt_sequence_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::Durable);
        let cam = s.camera_dir(CameraRole::Camera1);
        fs::create_dir_all(&cam).unwrap();
        fs::write(cam.join(SEQUENCE_FILE), b"seven").unwrap();
        assert!(matches!(s.next_index(CameraRole::Camera1), Err(Error::Io(_))));
    }

    #[test]
    fn prepare_creates_layout_for_the_chosen_stage() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::CountFiles);
        s.prepare(ArtifactKind::Edges).unwrap();
        for name in ["kamera1", "kamera2", "merged", "edges"] {
            assert!(dir.path().join(name).is_dir(), "{name}");
        }
        assert!(!dir.path().join("extracted").exists());
    }

    #[test]
    fn artifacts_use_stage_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path(), IndexPolicy::CountFiles);
        let frame = Frame::solid_rgb(2, 2, [255, 255, 255]);
        let p = s.persist_artifact(ArtifactKind::Extracted, &frame).unwrap();
        assert!(p.starts_with(dir.path().join("extracted")));
        assert!(p
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("cropped_"));
    }

    #[test]
    fn stamp_is_second_resolution() {
        let ts = time::macros::datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(file_stamp(ts), "20240305_070809");
    }
}
