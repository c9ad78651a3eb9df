use crate::font::{FontMetrics, ParsedFont};
use crate::layout::TextMeasure;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::sync::Arc;
use tiny_skia::{Path, PathBuilder};
use ttf_parser::{GlyphId, OutlineBuilder};

// Advance used for characters when no face (or no glyph) is available.
const MISSING_ADVANCE_EM: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub(crate) struct GlyphPlacement {
    pub(crate) glyph_id: u16,
    pub(crate) origin_x: f32,
    pub(crate) origin_y: f32,
    pub(crate) scale: f32,
}

/// Glyph positions for `text` starting at the pen position `(origin_x, baseline_y)`.
/// Also returns the total advance.
pub(crate) fn layout_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    origin_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_glyphs_unshaped(font_data, text, font_size, origin_x, baseline_y);
    };
    let units = face.units_per_em().max(1) as f32;
    let scale = font_size / units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.len() != positions.len() {
        return layout_glyphs_unshaped(font_data, text, font_size, origin_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        let advance = pos.x_advance as f32 * scale;
        if gid == 0 {
            pen_x += if advance > 0.0 {
                advance
            } else {
                font_size * MISSING_ADVANCE_EM
            };
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: origin_x + pen_x + pos.x_offset as f32 * scale,
            // Font units grow upwards, the canvas grows downwards.
            origin_y: baseline_y - pos.y_offset as f32 * scale,
            scale,
        });
        pen_x += advance;
    }
    (out, pen_x)
}

fn layout_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    origin_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return (Vec::new(), fallback_width(text, font_size));
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * MISSING_ADVANCE_EM;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: origin_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut adv = advance_units * scale;
        if adv <= 0.0 {
            adv = font_size * MISSING_ADVANCE_EM;
        }
        pen_x += adv;
    }
    (out, pen_x)
}

pub(crate) fn fallback_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * MISSING_ADVANCE_EM
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

/// Text measurement bound to one activated face (or none) and its metrics.
#[derive(Debug, Clone)]
pub struct FaceMeasure {
    face: Option<Arc<ParsedFont>>,
    metrics: FontMetrics,
}

impl FaceMeasure {
    pub fn new(face: Option<Arc<ParsedFont>>, metrics: FontMetrics) -> Self {
        Self { face, metrics }
    }

    pub(crate) fn face(&self) -> Option<&Arc<ParsedFont>> {
        self.face.as_ref()
    }
}

impl TextMeasure for FaceMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        match &self.face {
            Some(face) => layout_glyphs(face.data(), text, font_size, 0.0, 0.0).1,
            None => fallback_width(text, font_size),
        }
    }

    fn line_height(&self, font_size: f32) -> f32 {
        self.metrics.line_height(font_size)
    }

    fn baseline_offset(&self, font_size: f32) -> f32 {
        self.metrics.baseline_offset(font_size)
    }
}

/// Converts font outlines into a canvas-space path (y flipped).
pub(crate) struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    pub(crate) fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    pub(crate) fn finish(self) -> Option<Path> {
        self.builder.finish()
    }

    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Outline paths for a run of placed glyphs. Glyphs without outlines (spaces) are skipped.
pub(crate) fn glyph_paths(font_data: &[u8], placements: &[GlyphPlacement]) -> Vec<Path> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(placements.len());
    for placement in placements {
        let mut builder =
            GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
        if face
            .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
            .is_none()
        {
            continue;
        }
        if let Some(path) = builder.finish() {
            out.push(path);
        }
    }
    out
}
