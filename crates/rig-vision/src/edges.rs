use crate::io;
use crate::store::{ArtifactKind, CaptureStore, ExtractedArtifact};
use crate::{Error, Frame, PixelFormat, Result};
use image::GrayImage;
use std::path::Path;

pub const DEFAULT_LOW_THRESHOLD: f32 = 100.0;
pub const DEFAULT_HIGH_THRESHOLD: f32 = 200.0;

/// Canny edge map of the frame's luminance. Edge pixels are 255, all others 0.
pub fn detect_edges(frame: &Frame, low: f32, high: f32) -> Result<Frame> {
    if low.is_nan() || high.is_nan() || low > high {
        return Err(Error::Config(format!(
            "edge thresholds out of order: low {low} > high {high}"
        )));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(Error::Conversion("empty frame".to_string()));
    }
    let luma = frame.to_luma()?;
    let gray = GrayImage::from_raw(luma.width, luma.height, luma.data)
        .ok_or_else(|| Error::Conversion("luma buffer size mismatch".to_string()))?;
    let edges = imageproc::edges::canny(&gray, low, high);
    let (width, height) = edges.dimensions();
    Ok(Frame {
        width,
        height,
        pixel_format: PixelFormat::Gray8,
        data: edges.into_raw(),
        ts: frame.ts,
    })
}

/// Path-level stage writing single-channel maps into the store's `edges/` directory.
pub struct EdgeDetector<'a> {
    store: &'a CaptureStore,
    low: f32,
    high: f32,
}

impl<'a> EdgeDetector<'a> {
    pub fn new(store: &'a CaptureStore, low: f32, high: f32) -> Self {
        Self { store, low, high }
    }

    pub fn detect(&self, composite: &Path) -> Result<ExtractedArtifact> {
        let frame = io::read_frame(composite)?;
        let edges = detect_edges(&frame, self.low, self.high)?;
        let path = self.store.persist_artifact(ArtifactKind::Edges, &edges)?;
        let edge_pixels = edges.data.iter().filter(|&&v| v != 0).count();
        tracing::info!(path = %path.display(), edge_pixels, "edge map saved");
        Ok(ExtractedArtifact::EdgeMap {
            frame: edges,
            path,
            derived_from: composite.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ImageFormat;
    use crate::store::IndexPolicy;

    fn split(width: u32, height: u32, column: u32) -> Frame {
        Frame::from_rgb_fn(width, height, |x, _| {
            if x < column {
                [30, 30, 30]
            } else {
                [220, 220, 220]
            }
        })
    }

    #[test]
    fn flat_image_has_no_edges() {
        let f = Frame::solid_rgb(64, 48, [128, 128, 128]);
        let e = detect_edges(&f, DEFAULT_LOW_THRESHOLD, DEFAULT_HIGH_THRESHOLD).unwrap();
        assert_eq!(e.pixel_format, PixelFormat::Gray8);
        assert_eq!((e.width, e.height), (64, 48));
        assert!(e.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn hard_vertical_edge_gives_a_continuous_line() {
        let (w, h, col) = (64u32, 48u32, 32u32);
        let e = detect_edges(&split(w, h, col), DEFAULT_LOW_THRESHOLD, DEFAULT_HIGH_THRESHOLD)
            .unwrap();
        assert!(e.data.iter().all(|&v| v == 0 || v == 255));
        for y in 2..h - 2 {
            let near = (col - 2..=col + 1).any(|x| e.pixel(x, y) == Some(&[255u8][..]));
            assert!(near, "row {y} lost the edge");
            for x in 0..w {
                if x + 3 < col || x > col + 3 {
                    assert_eq!(e.pixel(x, y), Some(&[0u8][..]), "stray edge at ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let f = Frame::solid_rgb(4, 4, [0, 0, 0]);
        assert!(matches!(detect_edges(&f, 200.0, 100.0), Err(Error::Config(_))));
    }

    #[test]
    fn stage_persists_a_gray_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path(), ImageFormat::Png, IndexPolicy::CountFiles);
        let src = io::write_frame_unique(dir.path(), "split", &split(40, 20, 20), ImageFormat::Png)
            .unwrap();
        let artifact = EdgeDetector::new(&store, DEFAULT_LOW_THRESHOLD, DEFAULT_HIGH_THRESHOLD)
            .detect(&src)
            .unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Edges);
        assert!(artifact.path().starts_with(dir.path().join("edges")));
        let img = image::open(artifact.path()).unwrap();
        assert_eq!(img.color(), image::ColorType::L8);
    }
}
