//! HSV adjustment: rotate hue, scale saturation and value.

use crate::entities::attrs::Attrs;
use crate::entities::frame::Frame;

pub fn apply(frame: &Frame, attrs: &Attrs) -> Frame {
    let hue_shift = attrs.get_float_or("hue_shift", 0.0);
    let saturation = attrs.get_float_or("saturation", 1.0);
    let value = attrs.get_float_or("value", 1.0);

    if hue_shift.abs() < 0.01 && (saturation - 1.0).abs() < 0.001 && (value - 1.0).abs() < 0.001 {
        return frame.clone();
    }

    let mut out = frame.clone();
    for chunk in out.image_mut().chunks_exact_mut(4) {
        let (h, s, v) = rgb_to_hsv(
            chunk[0] as f32 / 255.0,
            chunk[1] as f32 / 255.0,
            chunk[2] as f32 / 255.0,
        );
        let (r, g, b) = hsv_to_rgb(
            (h + hue_shift).rem_euclid(360.0),
            (s * saturation).clamp(0.0, 1.0),
            (v * value).clamp(0.0, 1.0),
        );
        chunk[0] = (r * 255.0).round() as u8;
        chunk[1] = (g * 255.0).round() as u8;
        chunk[2] = (b * 255.0).round() as u8;
    }
    out
}

/// RGB in 0..1 to (hue degrees, saturation, value).
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta.abs() < 0.0001 {
        0.0
    } else if (max - r).abs() < 0.0001 {
        60.0 * (((g - b) / delta) % 6.0)
    } else if (max - g).abs() < 0.0001 {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    (if h < 0.0 { h + 360.0 } else { h }, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let m = v - c;

    let (r1, g1, b1) = match h_prime as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r1 + m, g1 + m, b1 + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::attrs::AttrValue;

    #[test]
    fn test_rgb_hsv_roundtrip() {
        let (h, s, v) = rgb_to_hsv(1.0, 0.0, 0.0);
        assert!(h.abs() < 1.0);
        assert!((s - 1.0).abs() < 0.01);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        assert!((r - 1.0).abs() < 0.01 && g.abs() < 0.01 && b.abs() < 0.01);
    }

    #[test]
    fn test_hue_shift_red_to_green() {
        let red = Frame::filled(1, 1, [255, 0, 0, 255]);
        let attrs = Attrs::new().with("hue_shift", AttrValue::Float(120.0));
        let p = apply(&red, &attrs).pixel(0, 0);
        assert!(p[1] > p[0] && p[1] > p[2]);
    }

    #[test]
    fn test_desaturate() {
        let c = Frame::filled(1, 1, [200, 50, 50, 255]);
        let attrs = Attrs::new().with("saturation", AttrValue::Float(0.0));
        let p = apply(&c, &attrs).pixel(0, 0);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }
}
