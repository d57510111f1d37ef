// src/signature/raster.rs
//! Fixed-resolution RGBA drawing surface backing the signature capture.

use crate::errors::CertificationError;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};

const GUIDE_COLOR: Rgba<u8> = Rgba([0xe5, 0xe7, 0xeb, 0xff]);
const GUIDE_DASH: u32 = 5;
const GUIDE_MARGIN: u32 = 50;
const GUIDE_OFFSET: u32 = 30;

/// Parses a `#rrggbb` color.
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>, CertificationError> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(CertificationError::Encoding(format!("invalid color '{}'", value)));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .map_err(|_| CertificationError::Encoding(format!("invalid color '{}'", value)))
    };
    Ok(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, 0xff]))
}

/// Drawing surface with round-capped line rendering.
pub struct Surface {
    image: RgbaImage,
    background: Rgba<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32, background: Rgba<u8>) -> Self {
        let mut surface = Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), background),
            background,
        };
        surface.draw_guide_line();
        surface
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Wipes the surface back to the blank background and guide line.
    pub fn reset(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = self.background;
        }
        self.draw_guide_line();
    }

    /// Dashed "sign here" line near the bottom edge.
    fn draw_guide_line(&mut self) {
        let (width, height) = self.image.dimensions();
        if height <= GUIDE_OFFSET || width <= GUIDE_MARGIN * 2 {
            return;
        }
        let y = height - GUIDE_OFFSET;
        for x in GUIDE_MARGIN..(width - GUIDE_MARGIN) {
            if ((x - GUIDE_MARGIN) / GUIDE_DASH) % 2 == 0 {
                self.image.put_pixel(x, y, GUIDE_COLOR);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.width() && y < self.height() {
            Some(*self.image.get_pixel(x, y))
        } else {
            None
        }
    }

    /// Fills a disc; pixels outside the surface are clipped.
    pub fn stamp(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
        let radius = radius.max(0.5);
        if cx + radius < 0.0 || cy + radius < 0.0 {
            return;
        }
        let min_x = (cx - radius).floor().max(0.0) as u32;
        let min_y = (cy - radius).floor().max(0.0) as u32;
        let max_x = ((cx + radius).ceil().max(0.0) as u32).min(self.width().saturating_sub(1));
        let max_y = ((cy + radius).ceil().max(0.0) as u32).min(self.height().saturating_sub(1));

        let radius_sq = radius * radius;
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= radius_sq {
                    self.image.put_pixel(x, y, color);
                }
            }
        }
    }

    /// Clips a segment to the surface grown by `margin` on every side.
    ///
    /// Returns `None` when no part of the segment can touch the surface.
    fn clip(&self, from: (f32, f32), to: (f32, f32), margin: f32) -> Option<((f32, f32), (f32, f32))> {
        if ![from.0, from.1, to.0, to.1, margin].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (min_x, min_y) = (-margin, -margin);
        let (max_x, max_y) = (self.width() as f32 + margin, self.height() as f32 + margin);
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);

        // Liang-Barsky: narrow [t0, t1] against each edge.
        let (mut t0, mut t1) = (0.0f32, 1.0f32);
        for (p, q) in [
            (-dx, from.0 - min_x),
            (dx, max_x - from.0),
            (-dy, from.1 - min_y),
            (dy, max_y - from.1),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }
        Some((
            (from.0 + dx * t0, from.1 + dy * t0),
            (from.0 + dx * t1, from.1 + dy * t1),
        ))
    }

    /// Draws a round-capped segment of the given width.
    ///
    /// The part of the segment that cannot reach the surface is skipped, so the
    /// cost is bounded by the surface size whatever the endpoints.
    pub fn line(&mut self, from: (f32, f32), to: (f32, f32), width: f32, color: Rgba<u8>) {
        let radius = width / 2.0;
        let Some((from, to)) = self.clip(from, to, radius.max(0.5) + 1.0) else {
            return;
        };
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let length = (dx * dx + dy * dy).sqrt();
        // Half-pixel spacing keeps consecutive discs overlapping at any width.
        let steps = (length / 0.5).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(from.0 + dx * t, from.1 + dy * t, radius, color);
        }
    }

    /// Encodes the surface as PNG bytes.
    pub fn encode_png(&self) -> Result<Vec<u8>, CertificationError> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(
                self.image.as_raw(),
                self.image.width(),
                self.image.height(),
                ColorType::Rgba8,
            )
            .map_err(|e| CertificationError::Encoding(e.to_string()))?;
        Ok(bytes)
    }
}
