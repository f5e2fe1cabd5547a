//! Text layout with the embedded DejaVu Sans face.

use std::sync::OnceLock;

use rusttype::{point, Font, PositionedGlyph, Scale};

static FACE_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
static FACE: OnceLock<Font<'static>> = OnceLock::new();

/// Label size in pixels
pub const SMALL: f32 = 12.0;
/// Title size in pixels
pub const TITLE: f32 = 22.0;

pub fn face() -> &'static Font<'static> {
    FACE.get_or_init(|| {
        Font::try_from_bytes(FACE_DATA).expect("embedded font is valid TrueType")
    })
}

/// Glyphs for `text` with the baseline at `(x, baseline)`
pub fn layout(text: &str, size: f32, x: f32, baseline: f32) -> Vec<PositionedGlyph<'static>> {
    face()
        .layout(text, Scale::uniform(size), point(x, baseline))
        .collect()
}

/// Distance from the top of a line to its baseline
pub fn ascent(size: f32) -> f32 {
    face().v_metrics(Scale::uniform(size)).ascent
}

/// Advance width of `text` in pixels
pub fn width(text: &str, size: f32) -> f32 {
    layout(text, size, 0.0, 0.0)
        .last()
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

/// Vertical pixel extent `(min_y, max_y)` of the inked glyphs
pub fn ink_extent(glyphs: &[PositionedGlyph<'_>]) -> Option<(i32, i32)> {
    glyphs
        .iter()
        .filter_map(|g| g.pixel_bounding_box())
        .fold(None, |acc, bb| match acc {
            None => Some((bb.min.y, bb.max.y)),
            Some((lo, hi)) => Some((lo.min(bb.min.y), hi.max(bb.max.y))),
        })
}
