//! Plate text rasterisation.
//!
//! Text becomes a coverage mask positioned in canvas coordinates; the
//! renderer composites the mask. Outline fonts go through `ab_glyph`. With no
//! font configured a built-in 5x7 block face is used, which covers `A-Z` and
//! `0-9` and draws a hollow box for anything else.

use std::fs;
use std::path::Path;

use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use image::{GrayImage, Luma};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GlyphError {
    #[error("Failed to read font {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid font data")]
    InvalidFont,
}

/// Coverage mask whose top-left pixel sits at (`left`, `top`) on the canvas.
#[derive(Debug, Clone)]
pub struct TextMask {
    pub left: i64,
    pub top: i64,
    pub coverage: GrayImage,
}

impl TextMask {
    fn empty(cx: f32, cy: f32) -> Self {
        Self {
            left: cx.round() as i64,
            top: cy.round() as i64,
            coverage: GrayImage::new(0, 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coverage.width() == 0 || self.coverage.height() == 0
    }
}

#[derive(Clone, Default)]
pub enum PlateFont {
    Outline(FontArc),
    #[default]
    Builtin,
}

impl std::fmt::Debug for PlateFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlateFont::Outline(_) => f.write_str("PlateFont::Outline"),
            PlateFont::Builtin => f.write_str("PlateFont::Builtin"),
        }
    }
}

impl PlateFont {
    pub fn from_file(path: &Path) -> Result<Self, GlyphError> {
        let data = fs::read(path).map_err(|source| GlyphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, GlyphError> {
        let font = FontArc::try_from_vec(data).map_err(|_| GlyphError::InvalidFont)?;
        Ok(PlateFont::Outline(font))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, PlateFont::Builtin)
    }

    /// Rasterise `text` at `px` em height, centred on (`cx`, `cy`).
    pub fn rasterize(&self, text: &str, px: f32, cx: f32, cy: f32) -> TextMask {
        if text.is_empty() {
            return TextMask::empty(cx, cy);
        }
        match self {
            PlateFont::Outline(font) => {
                let mask = rasterize_outline(font, text, px, cx, cy);
                // Regular faces get a synthetic bold.
                let radius = (px / 50.0).round() as u32;
                embolden(mask, radius)
            }
            PlateFont::Builtin => rasterize_builtin(text, px, cx, cy),
        }
    }
}

fn rasterize_outline(font: &FontArc, text: &str, px: f32, cx: f32, cy: f32) -> TextMask {
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);

    let mut glyphs = Vec::new();
    let mut caret = 0.0f32;
    let mut previous = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push((id, caret));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }

    let line_height = scaled.ascent() - scaled.descent();
    let left = cx - caret / 2.0;
    let baseline = cy - line_height / 2.0 + scaled.ascent();

    let outlined: Vec<_> = glyphs
        .into_iter()
        .filter_map(|(id, x)| {
            font.outline_glyph(id.with_scale_and_position(scale, point(left + x, baseline)))
        })
        .collect();

    if outlined.is_empty() {
        return TextMask::empty(cx, cy);
    }

    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for glyph in &outlined {
        let b = glyph.px_bounds();
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }

    let origin_x = min_x.floor() as i64;
    let origin_y = min_y.floor() as i64;
    let width = (max_x.ceil() as i64 - origin_x).max(0) as u32;
    let height = (max_y.ceil() as i64 - origin_y).max(0) as u32;
    let mut coverage = GrayImage::new(width, height);

    for glyph in &outlined {
        let b = glyph.px_bounds();
        let gx = b.min.x as i64 - origin_x;
        let gy = b.min.y as i64 - origin_y;
        glyph.draw(|x, y, c| {
            let px = gx + x as i64;
            let py = gy + y as i64;
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                return;
            }
            let value = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
            let pixel = coverage.get_pixel_mut(px as u32, py as u32);
            pixel.0[0] = pixel.0[0].max(value);
        });
    }

    TextMask { left: origin_x, top: origin_y, coverage }
}

/// Grow coverage by `radius` pixels in every direction.
fn embolden(mask: TextMask, radius: u32) -> TextMask {
    if radius == 0 || mask.is_empty() {
        return mask;
    }
    let r = radius as i64;
    let (w, h) = mask.coverage.dimensions();
    let out_w = w + 2 * radius;
    let out_h = h + 2 * radius;
    let mut out = GrayImage::new(out_w, out_h);

    for (x, y, src) in mask.coverage.enumerate_pixels() {
        let value = src.0[0];
        if value == 0 {
            continue;
        }
        for dy in 0..=2 * r {
            for dx in 0..=2 * r {
                let pixel = out.get_pixel_mut(x + dx as u32, y + dy as u32);
                pixel.0[0] = pixel.0[0].max(value);
            }
        }
    }

    TextMask {
        left: mask.left - r,
        top: mask.top - r,
        coverage: out,
    }
}

const CELL_COLUMNS: u32 = 5;
const CELL_ROWS: u32 = 7;
const CELL_ADVANCE: u32 = 6;

fn rasterize_builtin(text: &str, px: f32, cx: f32, cy: f32) -> TextMask {
    let dot = ((px * 0.7) / CELL_ROWS as f32).round().max(1.0) as u32;
    let count = text.chars().count() as u32;
    let width = (count * CELL_ADVANCE - 1) * dot;
    let height = CELL_ROWS * dot;
    let mut coverage = GrayImage::new(width, height);

    for (i, c) in text.chars().enumerate() {
        let rows = builtin_glyph(c);
        let x0 = i as u32 * CELL_ADVANCE * dot;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..CELL_COLUMNS {
                if bits & (1 << (CELL_COLUMNS - 1 - col)) == 0 {
                    continue;
                }
                for yy in 0..dot {
                    for xx in 0..dot {
                        coverage.put_pixel(x0 + col * dot + xx, row as u32 * dot + yy, Luma([255]));
                    }
                }
            }
        }
    }

    TextMask {
        left: (cx - width as f32 / 2.0).round() as i64,
        top: (cy - height as f32 / 2.0).round() as i64,
        coverage,
    }
}

fn builtin_glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        ' ' => [0; 7],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_mask_is_centred() {
        let mask = PlateFont::Builtin.rasterize("浙F12345", 105.0, 400.0, 564.0);
        let (w, h) = mask.coverage.dimensions();
        assert!(w > 0 && h > 0);
        let centre_x = mask.left as f32 + w as f32 / 2.0;
        let centre_y = mask.top as f32 + h as f32 / 2.0;
        assert!((centre_x - 400.0).abs() <= 1.0);
        assert!((centre_y - 564.0).abs() <= 1.0);
    }

    #[test]
    fn test_builtin_mask_has_ink() {
        let mask = PlateFont::Builtin.rasterize("A1", 70.0, 50.0, 50.0);
        assert!(mask.coverage.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_empty_text_yields_empty_mask() {
        assert!(PlateFont::Builtin.rasterize("", 105.0, 10.0, 10.0).is_empty());
    }

    #[test]
    fn test_embolden_grows_mask() {
        let mask = PlateFont::Builtin.rasterize("I", 14.0, 20.0, 20.0);
        let (w, h) = mask.coverage.dimensions();
        let bold = embolden(mask.clone(), 2);
        assert_eq!(bold.coverage.dimensions(), (w + 4, h + 4));
        assert_eq!(bold.left, mask.left - 2);
    }

    #[test]
    fn test_embolden_keeps_strongest_partial_coverage() {
        let mut coverage = GrayImage::new(2, 1);
        coverage.put_pixel(0, 0, image::Luma([128]));
        coverage.put_pixel(1, 0, image::Luma([255]));
        let bold = embolden(TextMask { left: 10, top: 20, coverage }, 1);

        assert_eq!(bold.coverage.dimensions(), (4, 3));
        assert_eq!((bold.left, bold.top), (9, 19));
        for y in 0..3 {
            assert_eq!(bold.coverage.get_pixel(0, y).0[0], 128);
            assert_eq!(bold.coverage.get_pixel(1, y).0[0], 255);
            assert_eq!(bold.coverage.get_pixel(3, y).0[0], 255);
        }
    }

    #[test]
    fn test_invalid_font_bytes_rejected() {
        assert!(matches!(PlateFont::from_bytes(vec![0, 1, 2, 3]), Err(GlyphError::InvalidFont)));
    }
}
