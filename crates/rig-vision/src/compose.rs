//! Horizontal concatenation of two camera frames.
//!
//! Merging is purely spatial: no scaling, no alignment. Rows the shorter
//! image does not cover stay black.

use crate::io;
use crate::store::{ArtifactKind, CaptureStore};
use crate::{Frame, PixelFormat, Result};
use std::path::{Path, PathBuf};

/// Composite of two frames, left image at x = 0.
#[derive(Clone, Debug)]
pub struct CompositeImage {
    pub frame: Frame,
    pub path: PathBuf,
    pub derived_from: (PathBuf, PathBuf),
}

/// `width = wl + wr`, `height = max(hl, hr)`; both inputs converted to `Rgb8`.
pub fn merge_frames(left: &Frame, right: &Frame) -> Result<Frame> {
    let left = left.to_rgb8()?;
    let right = right.to_rgb8()?;
    let width = left.width + right.width;
    let height = left.height.max(right.height);
    let mut canvas = Frame::blank(width, height, PixelFormat::Rgb8);
    blit(&mut canvas, &left, 0);
    blit(&mut canvas, &right, left.width);
    Ok(canvas)
}

fn blit(canvas: &mut Frame, src: &Frame, x0: u32) {
    let row_bytes = src.width as usize * 3;
    let canvas_stride = canvas.width as usize * 3;
    let offset = x0 as usize * 3;
    for (y, row) in src.data.chunks_exact(row_bytes).enumerate() {
        let start = y * canvas_stride + offset;
        canvas.data[start..start + row_bytes].copy_from_slice(row);
    }
}

/// Path-level merge stage writing into the store's `merged/` directory.
pub struct ImageCompositor<'a> {
    store: &'a CaptureStore,
}

impl<'a> ImageCompositor<'a> {
    pub fn new(store: &'a CaptureStore) -> Self {
        Self { store }
    }

    pub fn merge(&self, left: &Path, right: &Path) -> Result<CompositeImage> {
        let l = io::read_frame(left)?;
        let r = io::read_frame(right)?;
        let frame = merge_frames(&l, &r)?;
        let path = self.store.persist_artifact(ArtifactKind::Merged, &frame)?;
        tracing::info!(
            width = frame.width,
            height = frame.height,
            path = %path.display(),
            "composite saved"
        );
        Ok(CompositeImage {
            frame,
            path,
            derived_from: (left.to_path_buf(), right.to_path_buf()),
        })
    }
}
