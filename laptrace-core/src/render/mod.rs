//! Frame Rendering
//!
//! Turns a lap and a sample index into the two PNG images a viewer displays:
//! the telemetry strip chart and the track map. Rendering is pure; the same
//! lap and index always produce the same bytes.
//!
//! [`FrameRenderer`] draws the static layers (curves, axes, outline, corner
//! labels) once and only composes the marker per call. The layers are never
//! written after construction, so one renderer can be shared between threads.
//!
//! ```rust
//! use laptrace_core::lap::{LapSource, SyntheticLap};
//! use laptrace_core::render::FrameRenderer;
//! use std::sync::Arc;
//!
//! let lap = Arc::new(SyntheticLap::new(50).load().unwrap());
//! let renderer = FrameRenderer::new(lap);
//! let frame = renderer.render(10).unwrap();
//! assert_eq!(frame.index, 10);
//! ```

use std::sync::Arc;

use crate::error::RenderError;
use crate::lap::Lap;

pub mod canvas;
pub mod text;
mod telemetry;
mod track;

pub use telemetry::TelemetryLayer;
pub use track::TrackLayer;

pub const FRAME_WIDTH: u32 = 1000;
pub const FRAME_HEIGHT: u32 = 500;
const MARKER_RADIUS: f64 = 6.0;

/// Both images for one sample index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    pub index: usize,
    pub telemetry_png: Vec<u8>,
    pub track_png: Vec<u8>,
}

pub struct FrameRenderer {
    lap: Arc<Lap>,
    telemetry: TelemetryLayer,
    track: TrackLayer,
}

impl FrameRenderer {
    pub fn new(lap: Arc<Lap>) -> Self {
        let telemetry = TelemetryLayer::new(&lap);
        let track = TrackLayer::new(&lap);
        Self {
            lap,
            telemetry,
            track,
        }
    }

    pub fn lap(&self) -> &Arc<Lap> {
        &self.lap
    }

    pub fn render_telemetry(&self, index: usize) -> Result<Vec<u8>, RenderError> {
        check_index(&self.lap, index)?;
        self.telemetry.compose(&self.lap, index).encode_png()
    }

    pub fn render_track(&self, index: usize) -> Result<Vec<u8>, RenderError> {
        check_index(&self.lap, index)?;
        self.track.compose(&self.lap, index).encode_png()
    }

    /// Render both images from the same index
    pub fn render(&self, index: usize) -> Result<RenderedFrame, RenderError> {
        Ok(RenderedFrame {
            index,
            telemetry_png: self.render_telemetry(index)?,
            track_png: self.render_track(index)?,
        })
    }
}

/// Render the telemetry frame without keeping any layer around
pub fn render_telemetry_frame(lap: &Lap, index: usize) -> Result<Vec<u8>, RenderError> {
    check_index(lap, index)?;
    TelemetryLayer::new(lap).compose(lap, index).encode_png()
}

/// Render the track frame without keeping any layer around
pub fn render_track_frame(lap: &Lap, index: usize) -> Result<Vec<u8>, RenderError> {
    check_index(lap, index)?;
    TrackLayer::new(lap).compose(lap, index).encode_png()
}

fn check_index(lap: &Lap, index: usize) -> Result<(), RenderError> {
    if index >= lap.len() {
        return Err(RenderError::IndexOutOfRange {
            index,
            len: lap.len(),
        });
    }
    Ok(())
}

/// Round tick values (1, 2 or 5 times a power of ten) covering `[lo, hi]`
pub(crate) fn nice_ticks(lo: f64, hi: f64, target: usize) -> Vec<f64> {
    let span = hi - lo;
    if !span.is_finite() || span <= 0.0 || target == 0 {
        return Vec::new();
    }
    let raw = span / target as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);

    let mut ticks = Vec::new();
    let mut v = (lo / step).ceil() * step;
    while v <= hi + step * 1e-9 {
        ticks.push(v);
        v += step;
    }
    ticks
}
