//! Bitmap rendering for the greyscale panel
//!
//! 1. Decode the BMP and convert to luma
//! 2. Optionally invert
//! 3. Quantize to 8 grey levels, with Sierra Lite error diffusion when
//!    dithering is enabled
//! 4. Place at (padding-left, padding-top) on the rotated canvas, clipped to
//!    the area inside all four paddings
//! 5. Map logical coordinates to panel coordinates for the orientation

use image::{GrayImage, ImageFormat};
use thiserror::Error;

use crate::display::DisplayError;
use crate::framebuffer::{Framebuffer, GREY_LEVELS, WHITE};
use crate::settings::{DisplaySettings, Orientation};

/// Render error types
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("bitmap decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("display error: {0}")]
    Panel(#[from] DisplayError),
}

/// Nearest grey level for an 8-bit luma value
#[inline]
fn quantize(value: f32) -> u8 {
    let max = f32::from(WHITE);
    (value.clamp(0.0, 255.0) / 255.0 * max).round() as u8
}

/// Luma value a grey level displays as
#[inline]
fn level_value(level: u8) -> f32 {
    f32::from(level) * 255.0 / f32::from(WHITE)
}

/// Quantize every pixel to a grey level
fn quantize_image(img: &GrayImage, invert: bool, dithering: bool) -> Vec<u8> {
    let (width, height) = img.dimensions();
    let mut buffer: Vec<f32> = img
        .pixels()
        .map(|p| {
            let v = f32::from(p[0]);
            if invert { 255.0 - v } else { v }
        })
        .collect();

    if !dithering {
        return buffer.into_iter().map(quantize).collect();
    }

    let mut levels = vec![0u8; buffer.len()];
    let width = width as usize;
    let height = height as usize;

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let current = buffer[idx];
            let level = quantize(current);
            levels[idx] = level;

            let err = current - level_value(level);

            // Sierra Lite
            //       * 2/4
            //   1/4 1/4
            if x + 1 < width {
                buffer[idx + 1] += err * 0.5;
            }
            if y + 1 < height {
                if x > 0 {
                    buffer[idx + width - 1] += err * 0.25;
                }
                buffer[idx + width] += err * 0.25;
            }
        }
    }

    levels
}

/// Map a logical coordinate to the panel for an orientation
fn to_panel(orientation: Orientation, x: u32, y: u32, panel_w: u32, panel_h: u32) -> (u32, u32) {
    match orientation {
        Orientation::Landscape => (x, y),
        Orientation::PortraitLeft => (panel_w - 1 - y, x),
        Orientation::UpsideDown => (panel_w - 1 - x, panel_h - 1 - y),
        Orientation::PortraitRight => (y, panel_h - 1 - x),
    }
}

/// Render a BMP into the framebuffer
///
/// The framebuffer is cleared to white first, so margins stay white.
pub fn render_bitmap(
    bytes: &[u8],
    settings: &DisplaySettings,
    fb: &mut Framebuffer,
) -> Result<(), RenderError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Bmp)?.to_luma8();
    let (img_w, img_h) = img.dimensions();
    tracing::debug!("Bitmap {}x{} {:?}", img_w, img_h, settings);

    let levels = quantize_image(&img, settings.invert, settings.dithering);

    let (panel_w, panel_h) = (fb.width(), fb.height());
    let (canvas_w, canvas_h) = if settings.orientation.is_portrait() {
        (panel_h, panel_w)
    } else {
        (panel_w, panel_h)
    };

    let padding = settings.padding;
    let left = i64::from(padding.left);
    let top = i64::from(padding.top);
    let x_min = left.max(0);
    let y_min = top.max(0);
    let x_max = (i64::from(canvas_w) - i64::from(padding.right.max(0))).min(i64::from(canvas_w));
    let y_max = (i64::from(canvas_h) - i64::from(padding.bottom.max(0))).min(i64::from(canvas_h));

    fb.clear(WHITE);

    for iy in 0..img_h {
        let ly = top + i64::from(iy);
        if ly < y_min || ly >= y_max {
            continue;
        }
        for ix in 0..img_w {
            let lx = left + i64::from(ix);
            if lx < x_min || lx >= x_max {
                continue;
            }

            let level = levels[(iy * img_w + ix) as usize];
            let (px, py) = to_panel(settings.orientation, lx as u32, ly as u32, panel_w, panel_h);
            fb.set_pixel(px, py, level);
        }
    }

    Ok(())
}

/// Draw one vertical bar per grey level, darkest on the left
pub fn render_fallback(fb: &mut Framebuffer) {
    let bar = fb.width() / u32::from(GREY_LEVELS);
    for level in 0..GREY_LEVELS {
        fb.fill_rect(bar * u32::from(level), 0, bar, fb.height(), level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::BLACK;
    use crate::settings::Padding;
    use image::{DynamicImage, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn bmp(width: u32, height: u32, grey: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([grey, grey, grey]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Bmp)
            .unwrap();
        out
    }

    fn black_pixels(fb: &Framebuffer) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..fb.height() {
            for x in 0..fb.width() {
                if fb.pixel(x, y) == Some(BLACK) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    #[test]
    fn test_padding_offsets_image() {
        let mut fb = Framebuffer::new(8, 6);
        let settings = DisplaySettings {
            padding: Padding {
                top: 2,
                left: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        render_bitmap(&bmp(2, 2, 0), &settings, &mut fb).unwrap();
        assert_eq!(black_pixels(&fb), vec![(1, 2), (2, 2), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_right_padding_clips() {
        let mut fb = Framebuffer::new(8, 1);
        let settings = DisplaySettings {
            padding: Padding {
                right: 6,
                ..Default::default()
            },
            ..Default::default()
        };
        render_bitmap(&bmp(4, 1, 0), &settings, &mut fb).unwrap();
        assert_eq!(black_pixels(&fb), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_invert() {
        let mut fb = Framebuffer::new(2, 2);
        let settings = DisplaySettings {
            invert: true,
            ..Default::default()
        };
        render_bitmap(&bmp(2, 2, 255), &settings, &mut fb).unwrap();
        assert_eq!(black_pixels(&fb).len(), 4);
    }

    #[test]
    fn test_orientations() {
        let cases = [
            (Orientation::Landscape, (0, 0)),
            (Orientation::PortraitLeft, (3, 0)),
            (Orientation::UpsideDown, (3, 2)),
            (Orientation::PortraitRight, (0, 2)),
        ];
        for (orientation, expected) in cases {
            let mut fb = Framebuffer::new(4, 3);
            let settings = DisplaySettings {
                orientation,
                ..Default::default()
            };
            render_bitmap(&bmp(1, 1, 0), &settings, &mut fb).unwrap();
            assert_eq!(black_pixels(&fb), vec![expected], "{:?}", orientation);
        }
    }

    #[test]
    fn test_dithering_spreads_levels() {
        let img = GrayImage::from_pixel(8, 8, Luma([128]));

        let flat = quantize_image(&img, false, false);
        assert!(flat.iter().all(|&l| l == 4));

        let dithered = quantize_image(&img, false, true);
        assert!(dithered.contains(&3));
        assert!(dithered.contains(&4));
    }

    #[test]
    fn test_invalid_bitmap() {
        let mut fb = Framebuffer::new(2, 2);
        assert!(render_bitmap(b"not a bitmap", &DisplaySettings::default(), &mut fb).is_err());
    }

    #[test]
    fn test_fallback_bars() {
        let mut fb = Framebuffer::new(16, 2);
        render_fallback(&mut fb);
        for level in 0..GREY_LEVELS {
            assert_eq!(fb.pixel(u32::from(level) * 2, 1), Some(level));
        }
    }
}
