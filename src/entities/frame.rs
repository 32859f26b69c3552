//! RGBA8 raster buffer shared between layers, caches and history.
//!
//! `Frame` is a thin `Arc<RgbaImage>` handle: clones are cheap and share
//! pixels, writes go through [`Frame::image_mut`] which copies on write. A
//! history entry can therefore keep "the image before" simply by holding a
//! clone.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

/// Errors from building a frame out of raw data.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Byte count does not match `width * height * 4`.
    Dimensions { width: u32, height: u32, len: usize },
    /// Zero-sized canvas.
    Empty,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Dimensions { width, height, len } => {
                write!(f, "{len} bytes do not make a {width}x{height} RGBA image")
            }
            FrameError::Empty => write!(f, "frame has zero size"),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Clone)]
pub struct Frame {
    pixels: Arc<RgbaImage>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Frame {
    /// Fully transparent canvas.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    /// Canvas filled with a single RGBA color.
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { pixels: Arc::new(image) }
    }

    /// Build from tightly packed RGBA bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        let len = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::from_image)
            .ok_or(FrameError::Dimensions { width, height, len })
    }

    /// Decode any image format the `image` crate was built with.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("Failed to decode image {}", path.display()))?;
        Ok(Self::from_image(img.to_rgba8()))
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        self.pixels
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Small filled disc, used as a placeholder icon.
    pub fn circle(size: u32, color: [u8; 3]) -> Self {
        let r = size as f32 / 2.0;
        let img = RgbaImage::from_fn(size, size, |x, y| {
            let dx = x as f32 + 0.5 - r;
            let dy = y as f32 + 0.5 - r;
            if dx * dx + dy * dy <= r * r {
                Rgba([color[0], color[1], color[2], 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        Self::from_image(img)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Mutable pixels; detaches from other clones first.
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        Arc::make_mut(&mut self.pixels)
    }

    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.pixels).unwrap_or_else(|shared| (*shared).clone())
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// True when both frames hold identical pixels.
    pub fn same_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
            || (self.resolution() == other.resolution()
                && self.pixels.as_raw() == other.pixels.as_raw())
    }

    /// True when both handles point at the same buffer.
    pub fn shares_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Downscale to fit in a `size`x`size` box, keeping aspect ratio.
    pub fn thumbnail(&self, size: u32) -> Frame {
        let (w, h) = self.resolution();
        if w == 0 || h == 0 || size == 0 {
            return Frame::transparent(size.max(1), size.max(1));
        }
        let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
        let tw = ((w as f32 * scale).round() as u32).max(1);
        let th = ((h as f32 * scale).round() as u32).max(1);
        Frame::from_image(image::imageops::resize(self.image(), tw, th, FilterType::Triangle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write() {
        let a = Frame::filled(4, 4, [10, 20, 30, 255]);
        let mut b = a.clone();
        assert!(a.shares_buffer(&b));

        b.image_mut().put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        assert!(!a.shares_buffer(&b));
        assert_eq!(a.pixel(0, 0), [10, 20, 30, 255]);
        assert_eq!(b.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_from_raw_checks_size() {
        assert!(Frame::from_raw(2, 2, vec![0; 16]).is_ok());
        assert_eq!(
            Frame::from_raw(2, 2, vec![0; 15]).unwrap_err(),
            FrameError::Dimensions { width: 2, height: 2, len: 15 }
        );
        assert_eq!(Frame::from_raw(0, 2, vec![]).unwrap_err(), FrameError::Empty);
    }

    #[test]
    fn test_thumbnail_keeps_aspect() {
        let f = Frame::transparent(200, 100);
        assert_eq!(f.thumbnail(24).resolution(), (24, 12));
    }

    #[test]
    fn test_circle_center_and_corner() {
        let c = Frame::circle(24, [0, 138, 0]);
        assert_eq!(c.pixel(12, 12), [0, 138, 0, 255]);
        assert_eq!(c.pixel(0, 0)[3], 0);
    }
}
