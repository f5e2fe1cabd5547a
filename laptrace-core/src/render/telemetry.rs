//! Driving-style strip chart: throttle and brake against distance on the
//! left axis, speed on a secondary right axis.

use super::canvas::{Align, Canvas, Rect, Viewport, DARK_GREY, GREEN, GREY, RED, WHITE};
use super::{nice_ticks, FRAME_HEIGHT, FRAME_WIDTH, MARKER_RADIUS};
use super::text::{SMALL, TITLE};
use crate::lap::Lap;

const PLOT: Rect = Rect {
    left: 70.0,
    top: 60.0,
    right: 930.0,
    bottom: 440.0,
};

/// Static part of the telemetry frame, drawn once per lap
#[derive(Clone)]
pub struct TelemetryLayer {
    background: Canvas,
    pedals: Viewport,
    speed: Viewport,
}

impl TelemetryLayer {
    pub fn new(lap: &Lap) -> Self {
        let table = lap.samples();
        let distance = table.distance();
        let d_min = distance.iter().copied().fold(f64::INFINITY, f64::min);
        let d_max = distance.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let v_max = table.speed().iter().copied().fold(0.0, f64::max);

        let pedals = Viewport::new(PLOT, (d_min, d_max), (0.0, 105.0));
        let speed = Viewport::new(PLOT, (d_min, d_max), (0.0, (v_max * 1.05).max(1.0)));

        let mut canvas = Canvas::new(FRAME_WIDTH, FRAME_HEIGHT);
        draw_axes(&mut canvas, &pedals, &speed);

        let trace = |values: &[f64], vp: &Viewport| -> Vec<(f64, f64)> {
            distance
                .iter()
                .zip(values)
                .map(|(&d, &v)| vp.map(d, v))
                .collect()
        };
        canvas.polyline(&trace(table.throttle(), &pedals), 2.0, GREEN);
        canvas.polyline(&trace(table.brake(), &pedals), 2.0, RED);
        canvas.polyline(&trace(table.speed(), &speed), 2.0, WHITE);

        let info = lap.info();
        let title = format!(
            "DRIVING STYLE - {} (LAP {})",
            info.driver, info.lap_number
        );
        canvas.text(FRAME_WIDTH as f64 / 2.0, 12.0, &title, TITLE, Align::Center, WHITE);
        draw_legend(&mut canvas);

        Self {
            background: canvas,
            pedals,
            speed,
        }
    }

    /// Background plus the current-position markers for `index`.
    ///
    /// `index` must already be validated against the lap.
    pub fn compose(&self, lap: &Lap, index: usize) -> Canvas {
        let table = lap.samples();
        let d = table.distance()[index];
        let mut canvas = self.background.clone();

        let (x, y) = self.pedals.map(d, table.throttle()[index]);
        canvas.fill_circle(x, y, MARKER_RADIUS, RED);
        let (x, y) = self.speed.map(d, table.speed()[index]);
        canvas.fill_circle(x, y, MARKER_RADIUS, RED);
        canvas
    }
}

fn draw_axes(canvas: &mut Canvas, pedals: &Viewport, speed: &Viewport) {
    let r = PLOT;
    canvas.line((r.left, r.bottom), (r.right, r.bottom), 1.0, GREY);
    canvas.line((r.left, r.top), (r.left, r.bottom), 1.0, GREY);
    canvas.line((r.right, r.top), (r.right, r.bottom), 1.0, GREY);

    for d in nice_ticks(pedals.x.0, pedals.x.1, 8) {
        let (x, _) = pedals.map(d, 0.0);
        canvas.line((x, r.top), (x, r.bottom), 1.0, DARK_GREY);
        canvas.line((x, r.bottom), (x, r.bottom + 5.0), 1.0, GREY);
        canvas.text(x, r.bottom + 9.0, &format!("{:.0}", d), SMALL, Align::Center, WHITE);
    }
    for p in nice_ticks(0.0, 100.0, 5) {
        let (_, y) = pedals.map(0.0, p);
        canvas.line((r.left - 5.0, y), (r.left, y), 1.0, GREY);
        canvas.text(r.left - 8.0, y - 7.0, &format!("{:.0}", p), SMALL, Align::Right, WHITE);
    }
    for v in nice_ticks(0.0, speed.y.1, 6) {
        let (_, y) = speed.map(0.0, v);
        canvas.line((r.right, y), (r.right + 5.0, y), 1.0, GREY);
        canvas.text(r.right + 8.0, y - 7.0, &format!("{:.0}", v), SMALL, Align::Left, WHITE);
    }

    canvas.text(
        (r.left + r.right) / 2.0,
        r.bottom + 26.0,
        "DISTANCE (M)",
        SMALL,
        Align::Center,
        WHITE,
    );
    canvas.text(r.left, r.top - 16.0, "THROTTLE/BRAKE (%)", SMALL, Align::Left, WHITE);
    canvas.text(r.right, r.top - 16.0, "SPEED (KM/H)", SMALL, Align::Right, WHITE);
}

fn draw_legend(canvas: &mut Canvas) {
    let entries = [
        ("THROTTLE (%)", GREEN),
        ("BRAKE (%)", RED),
        ("SPEED (KM/H)", WHITE),
    ];
    let left = PLOT.right - 130.0;
    for (n, (label, color)) in entries.iter().enumerate() {
        let y = PLOT.top + 10.0 + n as f64 * 16.0;
        canvas.line((left, y + 7.0), (left + 16.0, y + 7.0), 2.0, *color);
        canvas.text(left + 22.0, y, label, SMALL, Align::Left, WHITE);
    }
    let y = PLOT.top + 10.0 + entries.len() as f64 * 16.0;
    canvas.fill_circle(left + 8.0, y + 7.0, 4.0, RED);
    canvas.text(left + 22.0, y, "CURRENT POSITION", SMALL, Align::Left, WHITE);
}
