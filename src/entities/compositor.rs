//! CPU compositor: paints one frame onto another.
//!
//! Colors are straight (non-premultiplied) RGBA8. Per pixel the top alpha is
//! `src_alpha * opacity * mask`, the blend function mixes backdrop and source
//! color, and the result is composited source-over. Rows are processed in
//! parallel with rayon.

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::frame::Frame;

/// Supported blend modes for layer compositing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Add,
    Subtract,
    Difference,
    Divide,
    Darken,
    Lighten,
    /// Groups only: children paint straight into the parent.
    PassThrough,
}

impl BlendMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Add => "Add",
            BlendMode::Subtract => "Subtract",
            BlendMode::Difference => "Difference",
            BlendMode::Divide => "Divide",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::PassThrough => "Pass Through",
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, BlendMode::PassThrough)
    }

    /// Blend a backdrop channel `b` with a source channel `t`, both in 0..=1.
    fn blend_channel(self, b: f32, t: f32) -> f32 {
        match self {
            BlendMode::Normal | BlendMode::PassThrough => t,
            BlendMode::Multiply => b * t,
            BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
            BlendMode::Add => (b + t).min(1.0),
            BlendMode::Subtract => (b - t).max(0.0),
            BlendMode::Difference => (b - t).abs(),
            BlendMode::Divide => {
                if t <= 0.00001 {
                    b
                } else {
                    (b / t).min(1.0)
                }
            }
            BlendMode::Darken => b.min(t),
            BlendMode::Lighten => b.max(t),
        }
    }
}

/// Grayscale coverage mask placed at `offset` in destination space.
/// Pixels outside the mask are fully covered.
#[derive(Clone, Copy, Debug)]
pub struct MaskRef<'a> {
    pub image: &'a GrayImage,
    pub offset: (i32, i32),
}

impl MaskRef<'_> {
    fn coverage(&self, x: i32, y: i32) -> f32 {
        let mx = x - self.offset.0;
        let my = y - self.offset.1;
        if mx < 0 || my < 0 || mx >= self.image.width() as i32 || my >= self.image.height() as i32 {
            return 1.0;
        }
        self.image.get_pixel(mx as u32, my as u32).0[0] as f32 / 255.0
    }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
fn blend_pixel(dst: &mut [u8], src: &[u8], factor: f32, mode: BlendMode) {
    let ta = src[3] as f32 / 255.0 * factor;
    if ta <= 0.0 {
        return;
    }
    let ba = dst[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);

    for c in 0..3 {
        let t = src[c] as f32 / 255.0;
        let b = dst[c] as f32 / 255.0;
        let mixed = (1.0 - ba) * t + ba * mode.blend_channel(b, t);
        let co = ta * mixed + (1.0 - ta) * ba * b;
        dst[c] = to_u8(co / out_a);
    }
    dst[3] = to_u8(out_a);
}

/// Paint `src` onto `dst` with its top-left corner at `offset`.
pub fn blend_onto(
    dst: &mut Frame,
    src: &Frame,
    offset: (i32, i32),
    opacity: f32,
    mode: BlendMode,
    mask: Option<MaskRef<'_>>,
) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return;
    }
    let (dw, dh) = dst.resolution();
    let (sw, sh) = src.resolution();
    let x0 = offset.0.max(0);
    let y0 = offset.1.max(0);
    let x1 = (offset.0 + sw as i32).min(dw as i32);
    let y1 = (offset.1 + sh as i32).min(dh as i32);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let src_raw = src.image().as_raw();
    let row_len = dw as usize * 4;
    let buf: &mut [u8] = dst.image_mut();

    buf.par_chunks_mut(row_len)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let sy = (y as i32 - offset.1) as usize;
            for x in x0..x1 {
                let sx = (x - offset.0) as usize;
                let si = (sy * sw as usize + sx) * 4;
                let di = x as usize * 4;
                let coverage = mask.map_or(1.0, |m| m.coverage(x, y as i32));
                blend_pixel(&mut row[di..di + 4], &src_raw[si..si + 4], opacity * coverage, mode);
            }
        });
}

/// Replace `dst` with `derived` (an adjustment result computed from `dst`),
/// partially where opacity or mask are below one.
pub fn apply_derived(dst: &mut Frame, derived: &Frame, opacity: f32, mask: Option<MaskRef<'_>>) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 {
        return;
    }
    if dst.resolution() != derived.resolution() {
        blend_onto(dst, derived, (0, 0), opacity, BlendMode::Normal, mask);
        return;
    }
    if opacity >= 1.0 && mask.is_none() {
        *dst = derived.clone();
        return;
    }

    let width = dst.width() as usize;
    let src_raw = derived.image().as_raw();
    let buf: &mut [u8] = dst.image_mut();
    buf.par_chunks_mut(width * 4).enumerate().for_each(|(y, row)| {
        for x in 0..width {
            let k = opacity * mask.map_or(1.0, |m| m.coverage(x as i32, y as i32));
            let i = x * 4;
            let si = (y * width + x) * 4;
            for c in 0..4 {
                let b = row[i + c] as f32;
                let t = src_raw[si + c] as f32;
                row[i + c] = (b + (t - b) * k).round().clamp(0.0, 255.0) as u8;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_normal_over_transparent() {
        let mut dst = Frame::transparent(4, 4);
        let src = Frame::filled(2, 2, [200, 100, 50, 255]);
        blend_onto(&mut dst, &src, (1, 1), 1.0, BlendMode::Normal, None);

        assert_eq!(dst.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(dst.pixel(1, 1), [200, 100, 50, 255]);
        assert_eq!(dst.pixel(2, 2), [200, 100, 50, 255]);
        assert_eq!(dst.pixel(3, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn test_offset_clips_outside_canvas() {
        let mut dst = Frame::transparent(3, 3);
        let src = Frame::filled(4, 4, [255, 255, 255, 255]);
        blend_onto(&mut dst, &src, (-2, 2), 1.0, BlendMode::Normal, None);
        assert_eq!(dst.pixel(0, 2)[3], 255);
        assert_eq!(dst.pixel(2, 2)[3], 0);
        assert_eq!(dst.pixel(0, 1)[3], 0);
    }

    #[test]
    fn test_multiply_and_opacity() {
        let mut dst = Frame::filled(1, 1, [200, 200, 200, 255]);
        let src = Frame::filled(1, 1, [128, 255, 0, 255]);
        blend_onto(&mut dst, &src, (0, 0), 1.0, BlendMode::Multiply, None);
        let p = dst.pixel(0, 0);
        assert!((p[0] as i32 - 100).abs() <= 1);
        assert_eq!(p[1], 200);
        assert_eq!(p[2], 0);

        let mut half = Frame::filled(1, 1, [0, 0, 0, 255]);
        blend_onto(&mut half, &Frame::filled(1, 1, [255, 255, 255, 255]), (0, 0), 0.5, BlendMode::Normal, None);
        assert!((half.pixel(0, 0)[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_mask_blocks_paint() {
        let mut mask = GrayImage::from_pixel(2, 1, Luma([255]));
        mask.put_pixel(0, 0, Luma([0]));
        let mut dst = Frame::transparent(2, 1);
        let src = Frame::filled(2, 1, [255, 0, 0, 255]);
        blend_onto(&mut dst, &src, (0, 0), 1.0, BlendMode::Normal, Some(MaskRef { image: &mask, offset: (0, 0) }));
        assert_eq!(dst.pixel(0, 0)[3], 0);
        assert_eq!(dst.pixel(1, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_apply_derived_full_and_partial() {
        let base = Frame::filled(2, 2, [0, 0, 0, 255]);
        let derived = Frame::filled(2, 2, [255, 255, 255, 255]);

        let mut full = base.clone();
        apply_derived(&mut full, &derived, 1.0, None);
        assert!(full.shares_buffer(&derived));

        let mut partial = base.clone();
        apply_derived(&mut partial, &derived, 0.5, None);
        assert_eq!(partial.pixel(1, 1), [128, 128, 128, 255]);
    }
}
