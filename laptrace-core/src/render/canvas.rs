//! Minimal raster drawing on an RGBA image.
//!
//! Shapes are painted opaque over whatever is below; text is blended by glyph
//! coverage. The untouched background stays fully transparent so the page's
//! own background shows through.

use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::{Rgba, RgbaImage};

use rusttype::PositionedGlyph;

use super::text;
use crate::error::RenderError;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const GREY: Rgba<u8> = Rgba([128, 128, 128, 255]);
pub const DARK_GREY: Rgba<u8> = Rgba([70, 70, 70, 255]);
pub const RED: Rgba<u8> = Rgba([230, 30, 30, 255]);
pub const GREEN: Rgba<u8> = Rgba([40, 180, 40, 255]);

/// Horizontal alignment of a text run relative to its anchor x
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// Pixel-space rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Maps data coordinates into a pixel rectangle, y axis pointing up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub rect: Rect,
    pub x: (f64, f64),
    pub y: (f64, f64),
}

impl Viewport {
    pub fn new(rect: Rect, x: (f64, f64), y: (f64, f64)) -> Self {
        Self {
            rect,
            x: widen(x),
            y: widen(y),
        }
    }

    pub fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let fx = (x - self.x.0) / (self.x.1 - self.x.0);
        let fy = (y - self.y.0) / (self.y.1 - self.y.0);
        (
            self.rect.left + fx * self.rect.width(),
            self.rect.bottom - fy * self.rect.height(),
        )
    }
}

// A zero-width range would divide by zero
fn widen((lo, hi): (f64, f64)) -> (f64, f64) {
    if (hi - lo).abs() < 1e-9 {
        (lo - 1.0, hi + 1.0)
    } else {
        (lo, hi)
    }
}

/// Liang-Barsky clip of a segment against `rect`.
///
/// None when the segment misses the rectangle or has a non-finite endpoint.
fn clip_segment(from: (f64, f64), to: (f64, f64), rect: Rect) -> Option<((f64, f64), (f64, f64))> {
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    let edges = [
        (-dx, from.0 - rect.left),
        (dx, rect.right - from.0),
        (-dy, from.1 - rect.top),
        (dy, rect.bottom - from.1),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
            if t0 > t1 {
                return None;
            }
        }
    }
    Some((
        (from.0 + t0 * dx, from.1 + t0 * dy),
        (from.0 + t1 * dx, from.1 + t1 * dy),
    ))
}

#[derive(Clone)]
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    /// Fully transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    pub fn put(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height()
        {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    pub fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
        let r2 = radius * radius;
        let x0 = ((cx - radius).floor() as i64).max(0);
        let x1 = ((cx + radius).ceil() as i64).min(self.image.width() as i64 - 1);
        let y0 = ((cy - radius).floor() as i64).max(0);
        let y1 = ((cy + radius).ceil() as i64).min(self.image.height() as i64 - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f64 + 0.5 - cx;
                let dy = y as f64 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.put(x, y, color);
                }
            }
        }
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        for y in rect.top.round() as i64..rect.bottom.round() as i64 {
            for x in rect.left.round() as i64..rect.right.round() as i64 {
                self.put(x, y, color);
            }
        }
    }

    /// Blend `color` over the pixel at `coverage` (0..1)
    pub fn blend(&mut self, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
        if x < 0 || y < 0 || x as u32 >= self.image.width() || y as u32 >= self.image.height() {
            return;
        }
        let a = coverage.clamp(0.0, 1.0);
        if a <= 0.0 {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        let dst_a = dst[3] as f32 / 255.0;
        let out_a = a + dst_a * (1.0 - a);
        for c in 0..3 {
            let mixed = (color[c] as f32 * a + dst[c] as f32 * dst_a * (1.0 - a)) / out_a;
            dst[c] = mixed.round() as u8;
        }
        dst[3] = (out_a * 255.0).round() as u8;
    }

    /// Straight segment of the given stroke width, stamped at half-pixel steps.
    ///
    /// The segment is clipped to the canvas first, so far-away endpoints cost
    /// no more than the visible part.
    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Rgba<u8>) {
        let margin = width.max(1.0);
        let bounds = Rect {
            left: -margin,
            top: -margin,
            right: self.image.width() as f64 + margin,
            bottom: self.image.height() as f64 + margin,
        };
        let Some((from, to)) = clip_segment(from, to, bounds) else {
            return;
        };

        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let steps = ((dx.abs().max(dy.abs())) * 2.0).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let (x, y) = (from.0 + dx * t, from.1 + dy * t);
            if width <= 1.0 {
                self.put(x.floor() as i64, y.floor() as i64, color);
            } else {
                self.fill_circle(x, y, width / 2.0, color);
            }
        }
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], width: f64, color: Rgba<u8>) {
        for pair in points.windows(2) {
            self.line(pair[0], pair[1], width, color);
        }
    }

    /// Draw text with its top edge at `y`, `size` in pixels
    pub fn text(&mut self, x: f64, y: f64, label: &str, size: f32, align: Align, color: Rgba<u8>) {
        let width = text::width(label, size) as f64;
        let left = match align {
            Align::Left => x,
            Align::Center => x - width / 2.0,
            Align::Right => x - width,
        };
        let glyphs = text::layout(label, size, left as f32, y as f32 + text::ascent(size));
        self.draw_glyphs(&glyphs, 0, color);
    }

    /// Text with its inked extent centred on `(x, y)`
    pub fn text_centered(&mut self, x: f64, y: f64, label: &str, size: f32, color: Rgba<u8>) {
        let left = x - text::width(label, size) as f64 / 2.0;
        let glyphs = text::layout(label, size, left as f32, 0.0);
        let Some((lo, hi)) = text::ink_extent(&glyphs) else {
            return;
        };
        let shift = (y - (lo + hi) as f64 / 2.0).round() as i64;
        self.draw_glyphs(&glyphs, shift, color);
    }

    fn draw_glyphs(&mut self, glyphs: &[PositionedGlyph<'_>], shift_y: i64, color: Rgba<u8>) {
        for glyph in glyphs {
            if let Some(bb) = glyph.pixel_bounding_box() {
                glyph.draw(|gx, gy, v| {
                    self.blend(
                        bb.min.x as i64 + gx as i64,
                        bb.min.y as i64 + gy as i64 + shift_y,
                        color,
                        v,
                    );
                });
            }
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_with_encoder(PngEncoder::new(&mut buf))?;
        Ok(buf.into_inner())
    }
}
