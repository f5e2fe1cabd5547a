//! Synthetic demo lap
//!
//! Generates a deterministic lap around a closed parametric circuit so the
//! server can run without recorded data. The speed trace comes from a simple
//! point-mass model: cornering speed is limited by lateral grip, then a
//! forward pass applies the acceleration limit and a backward pass the
//! braking limit. Throttle and brake follow from the resulting speed deltas.

use std::f64::consts::TAU;

use super::document::{
    CircuitDocument, CornerDocument, EventDocument, PositionColumns, TelemetryColumns,
};
use super::{Lap, LapDocument, LapSource};
use crate::error::LapError;

// Track units are decimetres, like the timing feed's position data
const UNITS_PER_METRE: f64 = 10.0;
const AXIS_X: f64 = 8000.0;
const AXIS_Y: f64 = 4000.0;
const WOBBLE: f64 = 1200.0;

const MAX_SPEED: f64 = 330.0 / 3.6; // m/s
const LATERAL_GRIP: f64 = 40.0; // m/s^2
const ACCELERATION: f64 = 12.0; // m/s^2
const DECELERATION: f64 = 45.0; // m/s^2

/// Generates a lap with `samples` rows
#[derive(Debug, Clone)]
pub struct SyntheticLap {
    samples: usize,
}

impl Default for SyntheticLap {
    fn default() -> Self {
        Self { samples: 600 }
    }
}

impl SyntheticLap {
    pub fn new(samples: usize) -> Self {
        Self { samples }
    }

    /// Build the equivalent lap document
    pub fn document(&self) -> LapDocument {
        let n = self.samples;
        let ts: Vec<f64> = (0..n).map(|i| TAU * i as f64 / n as f64).collect();

        let x: Vec<f64> = ts.iter().map(|&t| AXIS_X * t.cos()).collect();
        let y: Vec<f64> = ts
            .iter()
            .map(|&t| AXIS_Y * t.sin() + WOBBLE * (2.0 * t).sin())
            .collect();

        // Segment lengths in metres, segment i runs from sample i to i+1 (wrapping)
        let seg: Vec<f64> = (0..n)
            .map(|i| {
                let j = (i + 1) % n;
                ((x[j] - x[i]).powi(2) + (y[j] - y[i]).powi(2)).sqrt() / UNITS_PER_METRE
            })
            .collect();

        let mut distance = Vec::with_capacity(n);
        let mut travelled = 0.0;
        for s in seg.iter().take(n) {
            distance.push(travelled);
            travelled += s;
        }

        let speed = speed_profile(&ts, &seg);

        let mut throttle = Vec::with_capacity(n);
        let mut brake = Vec::with_capacity(n);
        for i in 0..n {
            let next = speed[(i + 1) % n];
            let delta = next - speed[i];
            if delta < -0.05 {
                throttle.push(0.0);
                brake.push(100.0);
            } else if delta > 0.05 || speed[i] >= MAX_SPEED - 0.01 {
                throttle.push(100.0);
                brake.push(0.0);
            } else {
                // Holding an apex speed
                throttle.push(35.0);
                brake.push(0.0);
            }
        }

        let corners = find_corners(&speed, &x, &y);

        LapDocument {
            driver: "DEMO".to_string(),
            lap_number: 1,
            event: EventDocument {
                name: Some("Synthetic Test Day".to_string()),
                location: "Synthetic Ring".to_string(),
            },
            telemetry: TelemetryColumns {
                distance,
                throttle,
                brake,
                speed: speed.iter().map(|v| v * 3.6).collect(),
            },
            position: PositionColumns { x, y },
            circuit: CircuitDocument {
                rotation: 0.0,
                corners,
            },
        }
    }
}

impl LapSource for SyntheticLap {
    fn describe(&self) -> String {
        format!("synthetic lap ({} samples)", self.samples)
    }

    fn load(&self) -> Result<Lap, LapError> {
        self.document().into_lap()
    }
}

/// Curvature of the parametric circuit at `t`, in 1/metre
fn curvature(t: f64) -> f64 {
    let dx = -AXIS_X * t.sin();
    let ddx = -AXIS_X * t.cos();
    let dy = AXIS_Y * t.cos() + 2.0 * WOBBLE * (2.0 * t).cos();
    let ddy = -AXIS_Y * t.sin() - 4.0 * WOBBLE * (2.0 * t).sin();
    let k = (dx * ddy - dy * ddx).abs() / (dx * dx + dy * dy).powf(1.5);
    k * UNITS_PER_METRE
}

/// Speed in m/s for every sample
fn speed_profile(ts: &[f64], seg: &[f64]) -> Vec<f64> {
    let n = ts.len();
    let mut v: Vec<f64> = ts
        .iter()
        .map(|&t| {
            let k = curvature(t);
            if k > 1e-9 {
                (LATERAL_GRIP / k).sqrt().min(MAX_SPEED)
            } else {
                MAX_SPEED
            }
        })
        .collect();

    // Two laps of each pass settle the wrap-around at the start/finish line
    for _ in 0..2 {
        for i in 0..n {
            let j = (i + 1) % n;
            let limit = (v[i] * v[i] + 2.0 * ACCELERATION * seg[i]).sqrt();
            v[j] = v[j].min(limit);
        }
        for i in (0..n).rev() {
            let j = (i + 1) % n;
            let limit = (v[j] * v[j] + 2.0 * DECELERATION * seg[i]).sqrt();
            v[i] = v[i].min(limit);
        }
    }
    v
}

/// Local speed minima become numbered corners, labelled away from the circuit centre
fn find_corners(speed: &[f64], x: &[f64], y: &[f64]) -> Vec<CornerDocument> {
    let n = speed.len();
    if n < 3 {
        return Vec::new();
    }
    let cx = x.iter().sum::<f64>() / n as f64;
    let cy = y.iter().sum::<f64>() / n as f64;

    let mut corners = Vec::new();
    for i in 0..n {
        let prev = speed[(i + n - 1) % n];
        let next = speed[(i + 1) % n];
        if speed[i] < prev && speed[i] <= next && speed[i] < MAX_SPEED * 0.9 {
            corners.push(CornerDocument {
                number: corners.len() as u32 + 1,
                letter: String::new(),
                x: x[i],
                y: y[i],
                angle: (y[i] - cy).atan2(x[i] - cx).to_degrees(),
            });
        }
    }
    corners
}
