use crate::{Error, Frame, PixelFormat, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Encoding used for persisted artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for ImageFormat {
    fn default() -> Self {
        ImageFormat::Jpeg { quality: 95 }
    }
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg { .. } => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// Decode an image file into an `Rgb8` frame.
pub fn read_frame(path: impl AsRef<Path>) -> Result<Frame> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| Error::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame {
        width,
        height,
        pixel_format: PixelFormat::Rgb8,
        data: rgb.into_raw(),
        ts: None,
    })
}

/// Encode a frame in memory. Gray frames stay single-channel; every other
/// layout is written as RGB.
pub fn encode_frame(frame: &Frame, format: ImageFormat) -> std::result::Result<Vec<u8>, String> {
    let rgb;
    let (data, color) = match frame.pixel_format {
        PixelFormat::Gray8 => {
            if frame.data.len() != frame.expected_len() {
                return Err("gray buffer size mismatch".to_string());
            }
            (&frame.data, ExtendedColorType::L8)
        }
        _ => {
            rgb = frame.to_rgb8().map_err(|e| e.to_string())?;
            (&rgb.data, ExtendedColorType::Rgb8)
        }
    };

    let mut buf = Vec::new();
    let written = match format {
        ImageFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut buf, quality)
            .write_image(data, frame.width, frame.height, color),
        ImageFormat::Png => {
            PngEncoder::new(&mut buf).write_image(data, frame.width, frame.height, color)
        }
    };
    written.map_err(|e| e.to_string())?;
    Ok(buf)
}

/// Encode `frame` into a new file at `path`. An existing file is left
/// untouched and reported as `Error::Exists`.
pub fn write_frame(path: impl AsRef<Path>, frame: &Frame, format: ImageFormat) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_frame(frame, format).map_err(|reason| Error::Encode {
        path: path.to_path_buf(),
        reason,
    })?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::Exists(path.to_path_buf()))
        }
        Err(e) => return Err(Error::Io(format!("{}: {e}", path.display()))),
    };
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::Io(format!("{}: {e}", path.display())))
}

/// Write `frame` as `dir/stem.ext`, or `dir/stem_2.ext`, `dir/stem_3.ext`, ...
/// when the name is taken.
pub fn write_frame_unique(
    dir: &Path,
    stem: &str,
    frame: &Frame,
    format: ImageFormat,
) -> Result<PathBuf> {
    const MAX_ATTEMPTS: u32 = 1000;
    let ext = format.extension();
    for attempt in 1..=MAX_ATTEMPTS {
        let name = if attempt == 1 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{attempt}.{ext}")
        };
        let path = dir.join(name);
        match write_frame(&path, frame, format) {
            Ok(()) => return Ok(path),
            Err(Error::Exists(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(Error::Io(format!(
        "no free file name for {stem}.{ext} in {}",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_keeps_pixels_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::from_rgb_fn(5, 3, |x, y| [x as u8 * 40, y as u8 * 80, 7]);
        let path = write_frame_unique(dir.path(), "sample", &frame, ImageFormat::Png).unwrap();
        assert_eq!(path.file_name().unwrap(), "sample.png");
        let back = read_frame(&path).unwrap();
        assert_eq!(back.width, 5);
        assert_eq!(back.height, 3);
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn gray_frames_are_written_single_channel() {
        let mut frame = Frame::blank(4, 4, PixelFormat::Gray8);
        frame.data[5] = 255;
        let bytes = encode_frame(&frame, ImageFormat::Png).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.color(), image::ColorType::L8);
    }

    #[test]
    fn collisions_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::solid_rgb(2, 2, [1, 2, 3]);
        let a = write_frame_unique(dir.path(), "merged_x", &frame, ImageFormat::default()).unwrap();
        let b = write_frame_unique(dir.path(), "merged_x", &frame, ImageFormat::default()).unwrap();
        assert_eq!(a.file_name().unwrap(), "merged_x.jpg");
        assert_eq!(b.file_name().unwrap(), "merged_x_2.jpg");
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(read_frame(&path), Err(Error::Decode { .. })));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_frame(dir.path().join("nope.png")),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn malformed_frame_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame {
            width: 10,
            height: 10,
            pixel_format: PixelFormat::Rgb8,
            data: vec![0; 3],
            ts: None,
        };
        assert!(matches!(
            write_frame_unique(dir.path(), "bad", &frame, ImageFormat::Png),
            Err(Error::Encode { .. })
        ));
        assert!(!dir.path().join("bad.png").exists());
    }

    #[test]
    fn write_frame_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edges.png");
        let frame = Frame::blank(3, 3, PixelFormat::Gray8);
        write_frame(&path, &frame, ImageFormat::Png).unwrap();
        let mut other = Frame::blank(5, 5, PixelFormat::Gray8);
        other.data[0] = 255;
        assert!(matches!(
            write_frame(&path, &other, ImageFormat::Png),
            Err(Error::Exists(_))
        ));
        assert_eq!(read_frame(&path).unwrap().width, 3);
    }
}
