//! Foreground extraction: isolate the largest dark region of a composite and
//! render it on a white background.
//!
//! The rig presents the part against a bright, evenly lit table, so a fixed
//! luminance cutoff separates object from background. Pixels at or below the
//! cutoff are foreground.

use crate::io;
use crate::store::{ArtifactKind, CaptureStore, ExtractedArtifact};
use crate::{Error, Frame, PixelFormat, Result, WHITE};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use std::path::Path;

pub const DEFAULT_CUTOFF: u8 = 50;

/// Outer boundary of one connected region of the binary mask.
#[derive(Clone, Debug, PartialEq)]
pub struct OuterContour {
    pub points: Vec<Point<i32>>,
    /// Twice the enclosed polygon area (kept integral).
    pub twice_area: i64,
    /// Bounding box origin `(left, top)`.
    pub origin: (i32, i32),
}

impl OuterContour {
    fn new(points: Vec<Point<i32>>) -> Self {
        let twice_area = twice_polygon_area(&points);
        let left = points.iter().map(|p| p.x).min().unwrap_or(0);
        let top = points.iter().map(|p| p.y).min().unwrap_or(0);
        Self {
            points,
            twice_area,
            origin: (left, top),
        }
    }

    pub fn area(&self) -> f64 {
        self.twice_area as f64 / 2.0
    }
}

/// Inverted binary threshold: `value <= cutoff` becomes 255, anything brighter 0.
pub fn threshold_inverted(luma: &Frame, cutoff: u8) -> Result<Frame> {
    if luma.pixel_format != PixelFormat::Gray8 {
        return Err(Error::Unsupported("threshold input must be Gray8"));
    }
    let data = luma
        .data
        .iter()
        .map(|&v| if v > cutoff { 0 } else { 255 })
        .collect();
    Ok(Frame {
        width: luma.width,
        height: luma.height,
        pixel_format: PixelFormat::Gray8,
        data,
        ts: luma.ts,
    })
}

/// Outermost contours of a binary mask; borders nested inside holes are ignored.
///
/// The tracer needs a background ring around the image: a region touching
/// column 0 would otherwise come back as a parentless hole. The mask is
/// traced inside a one-pixel zero frame and the points shifted back.
pub fn external_contours(mask: &Frame) -> Result<Vec<OuterContour>> {
    if mask.pixel_format != PixelFormat::Gray8 || mask.data.len() != mask.expected_len() {
        return Err(Error::Conversion("mask buffer size mismatch".to_string()));
    }
    let (w, h) = (mask.width, mask.height);
    let padded = GrayImage::from_fn(w + 2, h + 2, |x, y| {
        if x == 0 || y == 0 || x > w || y > h {
            Luma([0])
        } else {
            Luma([mask.data[(y - 1) as usize * w as usize + (x - 1) as usize]])
        }
    });
    Ok(find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            let points = c
                .points
                .into_iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect();
            OuterContour::new(points)
        })
        .collect())
}

fn twice_polygon_area(points: &[Point<i32>]) -> i64 {
    let n = points.len();
    if n < 3 {
        return 0;
    }
    let mut acc = 0i64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        acc += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    acc.abs()
}

/// Largest enclosed area wins. Equal areas go to the contour whose bounding
/// box origin comes first in row-major order (top row, then left column).
pub fn select_largest(contours: &[OuterContour]) -> Option<&OuterContour> {
    contours.iter().fold(None, |best: Option<&OuterContour>, c| match best {
        None => Some(c),
        Some(b) => {
            let c_key = (c.origin.1, c.origin.0);
            let b_key = (b.origin.1, b.origin.0);
            if c.twice_area > b.twice_area || (c.twice_area == b.twice_area && c_key < b_key) {
                Some(c)
            } else {
                Some(b)
            }
        }
    })
}

/// Rasterize a contour filled solid: its own pixels plus every pixel center
/// strictly inside the polygon (even-odd scanlines). Holes are filled.
pub fn fill_contour(contour: &OuterContour, width: u32, height: u32) -> Frame {
    let mut mask = Frame::blank(width, height, PixelFormat::Gray8);
    let (w, h) = (width as i32, height as i32);
    let mut crossings: Vec<Vec<f64>> = vec![Vec::new(); height as usize];
    let pts = &contour.points;
    let n = pts.len();
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        if a.y == b.y {
            continue;
        }
        let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
        // half-open [lo.y, hi.y) so shared vertices count once
        for y in lo.y.max(0)..hi.y.min(h) {
            let t = (y - lo.y) as f64 / (hi.y - lo.y) as f64;
            crossings[y as usize].push(lo.x as f64 + t * (hi.x - lo.x) as f64);
        }
    }
    for (y, xs) in crossings.iter_mut().enumerate() {
        xs.sort_by(|a, b| a.total_cmp(b));
        for pair in xs.chunks_exact(2) {
            let x0 = (pair[0].ceil() as i32).max(0);
            let x1 = (pair[1].floor() as i32).min(w - 1);
            for x in x0..=x1 {
                mask.data[y * width as usize + x as usize] = 255;
            }
        }
    }
    for p in pts {
        if p.x >= 0 && p.x < w && p.y >= 0 && p.y < h {
            mask.data[p.y as usize * width as usize + p.x as usize] = 255;
        }
    }
    mask
}

/// Per-pixel select: source color inside the mask, white outside.
pub fn compose_on_white(source: &Frame, mask: &Frame) -> Result<Frame> {
    let rgb = source.to_rgb8()?;
    if mask.width != rgb.width || mask.height != rgb.height || mask.data.len() != mask.expected_len()
    {
        return Err(Error::Conversion("mask does not match source".to_string()));
    }
    let data = rgb
        .data
        .chunks_exact(3)
        .zip(mask.data.iter())
        .flat_map(|(px, &m)| if m != 0 { [px[0], px[1], px[2]] } else { WHITE })
        .collect();
    Ok(Frame {
        width: rgb.width,
        height: rgb.height,
        pixel_format: PixelFormat::Rgb8,
        data,
        ts: rgb.ts,
    })
}

/// Full in-memory extraction. `Ok(None)` when the thresholded mask has no contour.
pub fn extract_foreground(frame: &Frame, cutoff: u8) -> Result<Option<Frame>> {
    let rgb = frame.to_rgb8()?;
    let luma = rgb.to_luma()?;
    let binary = threshold_inverted(&luma, cutoff)?;
    let contours = external_contours(&binary)?;
    tracing::debug!(contours = contours.len(), cutoff, "foreground contours");
    let Some(largest) = select_largest(&contours) else {
        return Ok(None);
    };
    tracing::debug!(
        area = largest.area(),
        left = largest.origin.0,
        top = largest.origin.1,
        "largest contour"
    );
    let mask = fill_contour(largest, rgb.width, rgb.height);
    compose_on_white(&rgb, &mask).map(Some)
}

/// Path-level stage writing into the store's `extracted/` directory.
pub struct ForegroundExtractor<'a> {
    store: &'a CaptureStore,
    cutoff: u8,
}

impl<'a> ForegroundExtractor<'a> {
    pub fn new(store: &'a CaptureStore, cutoff: u8) -> Self {
        Self { store, cutoff }
    }

    /// No artifact is written when nothing falls below the cutoff.
    pub fn extract(&self, composite: &Path) -> Result<Option<ExtractedArtifact>> {
        let frame = io::read_frame(composite)?;
        let Some(crop) = extract_foreground(&frame, self.cutoff)? else {
            tracing::warn!(
                path = %composite.display(),
                cutoff = self.cutoff,
                "no foreground contour found, nothing extracted"
            );
            return Ok(None);
        };
        let path = self.store.persist_artifact(ArtifactKind::Extracted, &crop)?;
        tracing::info!(path = %path.display(), "foreground crop saved");
        Ok(Some(ExtractedArtifact::ForegroundCrop {
            frame: crop,
            path,
            derived_from: composite.to_path_buf(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ImageFormat;
    use crate::store::IndexPolicy;

    const BRIGHT: [u8; 3] = [200, 205, 210];
    const DARK: [u8; 3] = [12, 20, 30];

    fn in_rect(x: u32, y: u32, r: (u32, u32, u32, u32)) -> bool {
        x >= r.0 && x < r.0 + r.2 && y >= r.1 && y < r.1 + r.3
    }

    fn scene(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> Frame {
        Frame::from_rgb_fn(w, h, |x, y| {
            if rects.iter().any(|&r| in_rect(x, y, r)) {
                DARK
            } else {
                BRIGHT
            }
        })
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let mut luma = Frame::blank(3, 1, PixelFormat::Gray8);
        luma.data = vec![50, 51, 0];
        let bin = threshold_inverted(&luma, 50).unwrap();
        assert_eq!(bin.data, vec![255, 0, 255]);
    }

    #[test]
    fn dark_rectangle_is_kept_and_everything_else_turns_white() {
        let rect = (30, 20, 40, 25);
        let src = scene(120, 80, &[rect]);
        let out = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        assert_eq!((out.width, out.height), (120, 80));
        for y in 0..80 {
            for x in 0..120 {
                let want = if in_rect(x, y, rect) { DARK } else { WHITE };
                assert_eq!(out.pixel(x, y), Some(&want[..]), "({x},{y})");
            }
        }
    }

    #[test]
    fn extraction_is_idempotent_on_its_output() {
        let src = scene(64, 48, &[(10, 10, 20, 15), (40, 30, 3, 3)]);
        let once = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        let twice = extract_foreground(&once, DEFAULT_CUTOFF).unwrap().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn bright_image_has_no_contours() {
        let src = Frame::solid_rgb(32, 32, BRIGHT);
        assert!(extract_foreground(&src, DEFAULT_CUTOFF).unwrap().is_none());
    }

    #[test]
    fn only_the_largest_region_survives() {
        let big = (5, 5, 20, 20);
        let small = (40, 5, 5, 5);
        let out = extract_foreground(&scene(60, 40, &[big, small]), DEFAULT_CUTOFF)
            .unwrap()
            .unwrap();
        assert_eq!(out.pixel(10, 10), Some(&DARK[..]));
        assert_eq!(out.pixel(42, 7), Some(&WHITE[..]));
    }

    #[test]
    fn equal_areas_prefer_the_topmost_region() {
        let lower_left = (2, 20, 6, 6);
        let upper_right = (30, 3, 6, 6);
        let out = extract_foreground(&scene(40, 30, &[lower_left, upper_right]), DEFAULT_CUTOFF)
            .unwrap()
            .unwrap();
        assert_eq!(out.pixel(32, 5), Some(&DARK[..]));
        assert_eq!(out.pixel(4, 22), Some(&WHITE[..]));
    }

    #[test]
    fn holes_inside_the_region_are_filled_with_source_pixels() {
        // dark ring with a bright 4x4 window in the middle
        let src = Frame::from_rgb_fn(30, 30, |x, y| {
            let outer = in_rect(x, y, (5, 5, 16, 16));
            let hole = in_rect(x, y, (11, 11, 4, 4));
            if outer && !hole {
                DARK
            } else {
                BRIGHT
            }
        });
        let out = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        assert_eq!(out.pixel(12, 12), Some(&BRIGHT[..]));
        assert_eq!(out.pixel(6, 6), Some(&DARK[..]));
        assert_eq!(out.pixel(2, 2), Some(&WHITE[..]));
    }

    #[test]
    fn single_pixel_and_border_touching_regions() {
        let src = scene(10, 10, &[(9, 9, 1, 1)]);
        let out = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        assert_eq!(out.pixel(9, 9), Some(&DARK[..]));
        assert_eq!(out.pixel(8, 9), Some(&WHITE[..]));

        let src = scene(10, 10, &[(0, 0, 10, 3)]);
        let out = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        assert_eq!(out.pixel(0, 0), Some(&DARK[..]));
        assert_eq!(out.pixel(9, 2), Some(&DARK[..]));
        assert_eq!(out.pixel(9, 3), Some(&WHITE[..]));
    }

    #[test]
    fn regions_on_every_edge_and_corner_are_extracted_exactly() {
        let placements = [
            ("left", (0, 10)),
            ("top", (10, 0)),
            ("right", (20, 10)),
            ("bottom", (10, 20)),
            ("top-left", (0, 0)),
            ("top-right", (20, 0)),
            ("bottom-left", (0, 20)),
            ("bottom-right", (20, 20)),
        ];
        for (name, (x0, y0)) in placements {
            let rect = (x0, y0, 10, 10);
            let out = extract_foreground(&scene(30, 30, &[rect]), DEFAULT_CUTOFF)
                .unwrap()
                .unwrap_or_else(|| panic!("{name}: region not found"));
            for y in 0..30 {
                for x in 0..30 {
                    let want = if in_rect(x, y, rect) { DARK } else { WHITE };
                    assert_eq!(out.pixel(x, y), Some(&want[..]), "{name} ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn left_edge_region_beats_a_smaller_interior_one() {
        let edge = (0, 5, 10, 10);
        let inner = (20, 20, 4, 4);
        let out = extract_foreground(&scene(30, 30, &[edge, inner]), DEFAULT_CUTOFF)
            .unwrap()
            .unwrap();
        assert_eq!(out.pixel(0, 5), Some(&DARK[..]));
        assert_eq!(out.pixel(21, 21), Some(&WHITE[..]));
    }

    #[test]
    fn origin_pixel_is_an_external_contour() {
        let mut mask = Frame::blank(4, 4, PixelFormat::Gray8);
        mask.data[0] = 255;
        let contours = external_contours(&mask).unwrap();
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].origin, (0, 0));
        assert!(contours[0].points.iter().all(|p| p.x == 0 && p.y == 0));
    }

    #[test]
    fn threshold_rejects_color_input() {
        let rgb = Frame::solid_rgb(2, 2, BRIGHT);
        assert!(matches!(
            threshold_inverted(&rgb, DEFAULT_CUTOFF),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn diagonal_region_is_filled_exactly() {
        // filled triangle below the diagonal
        let src = Frame::from_rgb_fn(20, 20, |x, y| if x <= y { DARK } else { BRIGHT });
        let out = extract_foreground(&src, DEFAULT_CUTOFF).unwrap().unwrap();
        for y in 0..20 {
            for x in 0..20 {
                let want = if x <= y { DARK } else { WHITE };
                assert_eq!(out.pixel(x, y), Some(&want[..]), "({x},{y})");
            }
        }
    }

    #[test]
    fn rectangle_area_matches_polygon_area() {
        let mut mask = Frame::blank(20, 20, PixelFormat::Gray8);
        for y in 2..7 {
            for x in 3..11 {
                mask.data[y * 20 + x] = 255;
            }
        }
        let contours = external_contours(&mask).unwrap();
        assert_eq!(contours.len(), 1);
        // polygon through pixel centers: (8-1) x (5-1)
        assert_eq!(contours[0].area(), 28.0);
        assert_eq!(contours[0].origin, (3, 2));
    }

    #[test]
    fn nested_regions_are_not_external() {
        // ring with an island inside its hole
        let mut mask = Frame::blank(20, 20, PixelFormat::Gray8);
        for y in 2..18 {
            for x in 2..18 {
                let ring = !(5..15).contains(&x) || !(5..15).contains(&y);
                let island = (8..12).contains(&x) && (8..12).contains(&y);
                if ring || island {
                    mask.data[y * 20 + x] = 255;
                }
            }
        }
        assert_eq!(external_contours(&mask).unwrap().len(), 1);
    }

    #[test]
    fn stage_writes_crop_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path(), ImageFormat::Png, IndexPolicy::CountFiles);
        let with_object = io::write_frame_unique(
            dir.path(),
            "obj",
            &scene(40, 30, &[(5, 5, 10, 10)]),
            ImageFormat::Png,
        )
        .unwrap();
        let empty = io::write_frame_unique(
            dir.path(),
            "empty",
            &Frame::solid_rgb(40, 30, BRIGHT),
            ImageFormat::Png,
        )
        .unwrap();

        let stage = ForegroundExtractor::new(&store, DEFAULT_CUTOFF);
        assert!(stage.extract(&empty).unwrap().is_none());
        assert!(!dir.path().join("extracted").exists());

        let artifact = stage.extract(&with_object).unwrap().unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Extracted);
        assert!(artifact.path().starts_with(dir.path().join("extracted")));
        let back = io::read_frame(artifact.path()).unwrap();
        assert_eq!(back.pixel(0, 0), Some(&WHITE[..]));
        assert_eq!(back.pixel(7, 7), Some(&DARK[..]));
    }
}
