//! Track map: the rotated circuit outline with numbered corners and the car's
//! current position.

use nalgebra::Point2;

use super::canvas::{Align, Canvas, Rect, Viewport, GREY, RED, WHITE};
use super::{FRAME_HEIGHT, FRAME_WIDTH, MARKER_RADIUS};
use super::text::{SMALL, TITLE};
use crate::lap::Lap;

const AREA: Rect = Rect {
    left: 40.0,
    top: 50.0,
    right: 960.0,
    bottom: 470.0,
};
const LABEL_RADIUS: f64 = 12.0;

/// Static part of the track frame, drawn once per lap
#[derive(Clone)]
pub struct TrackLayer {
    background: Canvas,
    viewport: Viewport,
}

impl TrackLayer {
    pub fn new(lap: &Lap) -> Self {
        let track = lap.samples().position();
        let labels = lap.corners().iter().map(|c| c.label_position);
        let viewport = equal_aspect(track.iter().copied().chain(labels), AREA);

        let mut canvas = Canvas::new(FRAME_WIDTH, FRAME_HEIGHT);
        let outline: Vec<(f64, f64)> = track.iter().map(|p| viewport.map(p.x, p.y)).collect();
        canvas.polyline(&outline, 2.0, WHITE);

        for corner in lap.corners() {
            let at = viewport.map(corner.position.x, corner.position.y);
            let label = viewport.map(corner.label_position.x, corner.label_position.y);
            canvas.line(at, label, 1.0, GREY);
            canvas.fill_circle(label.0, label.1, LABEL_RADIUS, GREY);
            canvas.text_centered(label.0, label.1, &corner.label(), SMALL, WHITE);
        }

        canvas.text(
            FRAME_WIDTH as f64 / 2.0,
            12.0,
            &lap.info().location,
            TITLE,
            Align::Center,
            WHITE,
        );

        let left = AREA.right - 130.0;
        canvas.line((left, 23.0), (left + 16.0, 23.0), 2.0, WHITE);
        canvas.text(left + 22.0, 16.0, "TRACK", SMALL, Align::Left, WHITE);
        canvas.fill_circle(left + 8.0, 37.0, 4.0, RED);
        canvas.text(left + 22.0, 30.0, "CURRENT POSITION", SMALL, Align::Left, WHITE);

        Self {
            background: canvas,
            viewport,
        }
    }

    /// Background plus the position marker for `index`.
    ///
    /// `index` must already be validated against the lap.
    pub fn compose(&self, lap: &Lap, index: usize) -> Canvas {
        let p = lap.samples().position()[index];
        let (x, y) = self.viewport.map(p.x, p.y);
        let mut canvas = self.background.clone();
        canvas.fill_circle(x, y, MARKER_RADIUS, RED);
        canvas
    }
}

/// Fit the points into `area`, same scale on both axes, centred
fn equal_aspect(points: impl Iterator<Item = Point2<f64>>, area: Rect) -> Viewport {
    let (mut x0, mut x1, mut y0, mut y1) = (
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::INFINITY,
        f64::NEG_INFINITY,
    );
    for p in points {
        x0 = x0.min(p.x);
        x1 = x1.max(p.x);
        y0 = y0.min(p.y);
        y1 = y1.max(p.y);
    }
    let span_x = (x1 - x0).max(1.0);
    let span_y = (y1 - y0).max(1.0);
    let units_per_px = (span_x / area.width()).max(span_y / area.height());

    let cx = (x0 + x1) / 2.0;
    let cy = (y0 + y1) / 2.0;
    let half_w = area.width() * units_per_px / 2.0;
    let half_h = area.height() * units_per_px / 2.0;
    Viewport::new(area, (cx - half_w, cx + half_w), (cy - half_h, cy + half_h))
}
