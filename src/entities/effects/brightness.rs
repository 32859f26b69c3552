//! Brightness/Contrast.
//!
//! `output = (input - 0.5) * (1 + contrast) + 0.5 + brightness`, per color
//! channel in 0..1. Alpha is unchanged.

use crate::entities::attrs::Attrs;
use crate::entities::frame::Frame;

pub fn apply(frame: &Frame, attrs: &Attrs) -> Frame {
    let brightness = attrs.get_float_or("brightness", 0.0);
    let contrast = attrs.get_float_or("contrast", 0.0);

    if brightness.abs() < 0.0001 && contrast.abs() < 0.0001 {
        return frame.clone();
    }

    let cf = 1.0 + contrast;
    let mut out = frame.clone();
    for chunk in out.image_mut().chunks_exact_mut(4) {
        for v in &mut chunk[..3] {
            let x = *v as f32 / 255.0;
            *v = (((x - 0.5) * cf + 0.5 + brightness).clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::attrs::AttrValue;

    #[test]
    fn test_no_change_shares_pixels() {
        let frame = Frame::filled(3, 3, [1, 2, 3, 4]);
        let attrs = Attrs::new()
            .with("brightness", AttrValue::Float(0.0))
            .with("contrast", AttrValue::Float(0.0));
        assert!(apply(&frame, &attrs).shares_buffer(&frame));
    }

    #[test]
    fn test_brightness_increase() {
        let frame = Frame::filled(2, 2, [128, 128, 128, 255]);
        let attrs = Attrs::new().with("brightness", AttrValue::Float(0.5));
        let out = apply(&frame, &attrs);
        assert!(out.pixel(0, 0)[0] > 200);
        assert_eq!(out.pixel(0, 0)[3], 255);
    }

    #[test]
    fn test_full_negative_contrast_is_gray() {
        let frame = Frame::filled(1, 1, [0, 255, 30, 255]);
        let attrs = Attrs::new().with("contrast", AttrValue::Float(-1.0));
        let p = apply(&frame, &attrs).pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }
}
