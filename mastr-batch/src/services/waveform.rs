//! Waveform rendering
//!
//! Draws the min/max envelope as one vertical bar per column into a PNG.
//! Diagnostic only; nothing in the pipeline reads the image back.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const DEFAULT_WIDTH: u32 = 1200;
pub const DEFAULT_HEIGHT: u32 = 240;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const WAVE: Rgb<u8> = Rgb([33, 90, 160]);
const AXIS: Rgb<u8> = Rgb([200, 200, 200]);

/// Render `peaks` (min, max per column, in [-1, 1]) as PNG bytes
///
/// `peaks` is stretched or squeezed to `width` columns.
pub fn render_png(peaks: &[(f32, f32)], width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let width = width.max(1);
    let height = height.max(2);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let mid = height / 2;
    for x in 0..width {
        img.put_pixel(x, mid, AXIS);
    }

    if !peaks.is_empty() {
        for x in 0..width {
            let idx = (x as usize * peaks.len()) / width as usize;
            let (lo, hi) = peaks[idx.min(peaks.len() - 1)];
            let top = to_row(hi, height);
            let bottom = to_row(lo, height);
            for y in top.min(bottom)..=top.max(bottom) {
                img.put_pixel(x, y, WAVE);
            }
        }
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Amplitude to pixel row, +1 at the top
fn to_row(amplitude: f32, height: u32) -> u32 {
    let clamped = if amplitude.is_finite() { amplitude.clamp(-1.0, 1.0) } else { 0.0 };
    let max_row = (height - 1) as f32;
    (((1.0 - clamped) / 2.0) * max_row).round() as u32
}
