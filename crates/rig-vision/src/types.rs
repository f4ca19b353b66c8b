use crate::{Error, Result};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Row-major, tightly packed pixel buffer shared by every stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    pub ts: Option<OffsetDateTime>,
}

pub const WHITE: [u8; 3] = [255, 255, 255];

impl Frame {
    /// All-zero (black) frame.
    pub fn blank(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let len = width as usize * height as usize * pixel_format.channels();
        Self {
            width,
            height,
            pixel_format,
            data: vec![0u8; len],
            ts: None,
        }
    }

    /// Build an `Rgb8` frame by evaluating `f(x, y)` for every pixel.
    pub fn from_rgb_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            pixel_format: PixelFormat::Rgb8,
            data,
            ts: None,
        }
    }

    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::from_rgb_fn(width, height, |_, _| rgb)
    }

    pub fn channels(&self) -> usize {
        self.pixel_format.channels()
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels()
    }

    pub fn with_timestamp(mut self, ts: OffsetDateTime) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Raw channel bytes of pixel `(x, y)`, `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * c;
        self.data.get(start..start + c)
    }

    /// Convert into the canonical 3-channel `Rgb8` layout.
    pub fn to_rgb8(&self) -> Result<Frame> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Conversion(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.data.len() != self.expected_len() {
            return Err(Error::Conversion(format!(
                "{:?} buffer holds {} bytes, {}x{} needs {}",
                self.pixel_format,
                self.data.len(),
                self.width,
                self.height,
                self.expected_len()
            )));
        }
        let data = match self.pixel_format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Rgba8 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2]])
                .collect(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        Ok(Frame {
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Rgb8,
            data,
            ts: self.ts,
        })
    }

    /// Single-channel luminance (BT.601 weights, 14-bit fixed point).
    pub fn to_luma(&self) -> Result<Frame> {
        if self.pixel_format == PixelFormat::Gray8 {
            if self.data.len() != self.expected_len() {
                return Err(Error::Conversion("gray buffer size mismatch".to_string()));
            }
            return Ok(self.clone());
        }
        let rgb = self.to_rgb8()?;
        let data = rgb
            .data
            .chunks_exact(3)
            .map(|p| luma601(p[0], p[1], p[2]))
            .collect();
        Ok(Frame {
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Gray8,
            data,
            ts: self.ts,
        })
    }
}

fn luma601(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    let y = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14;
    y.min(255) as u8
}
