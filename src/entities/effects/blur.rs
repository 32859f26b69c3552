//! Separable Gaussian blur: one horizontal and one vertical pass, edges
//! sampled with clamping. Rows of each pass run in parallel.

use rayon::prelude::*;

use crate::entities::attrs::Attrs;
use crate::entities::frame::Frame;

pub fn apply(frame: &Frame, attrs: &Attrs) -> Frame {
    let radius = attrs.get_float_or("radius", 5.0);
    if radius <= 0.0 {
        return frame.clone();
    }

    let (w, h) = frame.resolution();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return frame.clone();
    }

    let src: Vec<f32> = frame.image().as_raw().iter().map(|&v| v as f32).collect();
    let kernel = gaussian_kernel(radius);
    let temp = convolve(&src, w, h, &kernel, true);
    let result = convolve(&temp, w, h, &kernel, false);

    let mut out = frame.clone();
    for (dst, v) in out.image_mut().iter_mut().zip(result) {
        *dst = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Normalized 1D kernel, half-size `ceil(2 * radius)`, sigma `radius / 2`.
fn gaussian_kernel(radius: f32) -> Vec<f32> {
    let half_size = (radius * 2.0).ceil() as i32;
    let sigma = radius / 2.0;
    let sigma2 = sigma * sigma;

    let mut kernel: Vec<f32> = (-half_size..=half_size)
        .map(|i| {
            let x = i as f32;
            (-x * x / (2.0 * sigma2)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

fn convolve(src: &[f32], width: usize, height: usize, kernel: &[f32], horizontal: bool) -> Vec<f32> {
    let mut dst = vec![0.0f32; src.len()];
    let half = (kernel.len() / 2) as i32;

    dst.par_chunks_mut(width * 4).enumerate().for_each(|(y, row)| {
        for x in 0..width {
            let mut acc = [0.0f32; 4];
            for (ki, &weight) in kernel.iter().enumerate() {
                let off = ki as i32 - half;
                let idx = if horizontal {
                    let sx = (x as i32 + off).clamp(0, width as i32 - 1) as usize;
                    (y * width + sx) * 4
                } else {
                    let sy = (y as i32 + off).clamp(0, height as i32 - 1) as usize;
                    (sy * width + x) * 4
                };
                for c in 0..4 {
                    acc[c] += src[idx + c] * weight;
                }
            }
            row[x * 4..x * 4 + 4].copy_from_slice(&acc);
        }
    });
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::attrs::AttrValue;
    use image::Rgba;

    #[test]
    fn test_gaussian_kernel() {
        let kernel = gaussian_kernel(5.0);
        assert!(kernel.len() % 2 == 1);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 0.001);
        let center = kernel.len() / 2;
        assert!(kernel[center] > kernel[0]);
    }

    #[test]
    fn test_zero_radius_noop() {
        let frame = Frame::filled(4, 4, [9, 9, 9, 255]);
        let attrs = Attrs::new().with("radius", AttrValue::Float(0.0));
        assert!(apply(&frame, &attrs).shares_buffer(&frame));
    }

    #[test]
    fn test_uniform_stays_uniform_and_spike_spreads() {
        let flat = Frame::filled(5, 5, [100, 100, 100, 255]);
        let attrs = Attrs::new().with("radius", AttrValue::Float(1.0));
        assert!(apply(&flat, &attrs).same_pixels(&flat));

        let mut spike = Frame::filled(5, 5, [0, 0, 0, 255]);
        spike.image_mut().put_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let out = apply(&spike, &attrs);
        assert!(out.pixel(2, 2)[0] < 255);
        assert!(out.pixel(1, 2)[0] > 0);
    }
}
