//! JSON lap document
//!
//! This is the exchange format for a recorded lap. Telemetry and position are
//! sampled at different rates by the timing system, so positions are
//! resampled onto the telemetry indices when the two lengths differ.
//!
//! ```json
//! {
//!   "driver": "LEC", "lap_number": 17,
//!   "event": { "name": "Italian Grand Prix", "location": "Monza" },
//!   "telemetry": { "distance": [..], "throttle": [..], "brake": [..], "speed": [..] },
//!   "position": { "x": [..], "y": [..] },
//!   "circuit": { "rotation": 92.0, "corners": [{ "number": 1, "letter": "", "x": .., "y": .., "angle": .. }] }
//! }
//! ```

use std::io::Read;

use nalgebra::Point2;
use serde::{Deserialize, Deserializer, Serialize};

use super::{rotate, CornerAnnotation, Lap, LapInfo, SampleTable};
use crate::error::LapError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryColumns {
    pub distance: Vec<f64>,
    pub throttle: Vec<f64>,
    /// Percent; the timing feed reports a plain on/off flag, which maps to 0/100
    #[serde(deserialize_with = "brake_column")]
    pub brake: Vec<f64>,
    pub speed: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionColumns {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerDocument {
    pub number: u32,
    #[serde(default)]
    pub letter: String,
    pub x: f64,
    pub y: f64,
    /// Degrees
    pub angle: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitDocument {
    /// Degrees, counter-clockwise
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub corners: Vec<CornerDocument>,
}

/// A lap as it is stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapDocument {
    pub driver: String,
    pub lap_number: u32,
    #[serde(default)]
    pub event: EventDocument,
    pub telemetry: TelemetryColumns,
    pub position: PositionColumns,
    #[serde(default)]
    pub circuit: CircuitDocument,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BrakeValue {
    Flag(bool),
    Percent(f64),
}

fn brake_column<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<BrakeValue>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .map(|v| match v {
            BrakeValue::Flag(true) => 100.0,
            BrakeValue::Flag(false) => 0.0,
            BrakeValue::Percent(p) => p,
        })
        .collect())
}

impl LapDocument {
    pub fn from_json(json: &str) -> Result<Self, LapError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LapError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Validate the columns and build the immutable lap
    pub fn into_lap(self) -> Result<Lap, LapError> {
        let LapDocument {
            driver,
            lap_number,
            event,
            telemetry,
            position,
            circuit,
        } = self;

        let n = telemetry.distance.len();
        if n == 0 {
            return Err(LapError::EmptySamples);
        }
        if position.x.len() != position.y.len() {
            return Err(LapError::LengthMismatch {
                column: "position.y",
                expected: position.x.len(),
                actual: position.y.len(),
            });
        }
        if position.x.is_empty() {
            return Err(LapError::DataUnavailable(
                "lap has telemetry but no position samples".to_string(),
            ));
        }

        let rotation = circuit.rotation.to_radians();
        let track = resample(&position.x, &position.y, n)
            .into_iter()
            .map(|p| rotate(p, rotation))
            .collect();

        let samples = SampleTable::new(
            telemetry.distance,
            telemetry.throttle,
            telemetry.brake,
            telemetry.speed,
            track,
        )?;

        let corners = circuit
            .corners
            .iter()
            .map(|c| {
                CornerAnnotation::from_circuit(
                    c.number,
                    &c.letter,
                    Point2::new(c.x, c.y),
                    c.angle,
                    rotation,
                )
            })
            .collect();

        let info = LapInfo {
            driver,
            lap_number,
            location: event.location,
            event_name: event.name,
        };

        Ok(Lap::new(samples, corners, info))
    }
}

/// Linearly resample a polyline onto `n` evenly spaced indices.
///
/// `xs` and `ys` must have the same, non-zero length.
fn resample(xs: &[f64], ys: &[f64], n: usize) -> Vec<Point2<f64>> {
    let m = xs.len();
    if m == n {
        return xs.iter().zip(ys).map(|(&x, &y)| Point2::new(x, y)).collect();
    }
    if m == 1 || n == 1 {
        return vec![Point2::new(xs[0], ys[0]); n];
    }

    let step = (m - 1) as f64 / (n - 1) as f64;
    (0..n)
        .map(|i| {
            let t = i as f64 * step;
            let lo = (t.floor() as usize).min(m - 1);
            let hi = (lo + 1).min(m - 1);
            let frac = t - lo as f64;
            Point2::new(
                xs[lo] + (xs[hi] - xs[lo]) * frac,
                ys[lo] + (ys[hi] - ys[lo]) * frac,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "driver": "LEC",
        "lap_number": 17,
        "event": { "name": "Italian Grand Prix", "location": "Monza" },
        "telemetry": {
            "distance": [0.0, 10.0, 20.0],
            "throttle": [100.0, 100.0, 0.0],
            "brake": [false, false, true],
            "speed": [300.0, 310.0, 250.0]
        },
        "position": { "x": [0.0, 100.0, 200.0], "y": [0.0, 0.0, 0.0] },
        "circuit": {
            "rotation": 0.0,
            "corners": [{ "number": 1, "letter": "", "x": 200.0, "y": 0.0, "angle": 90.0 }]
        }
    }"#;

    #[test]
    fn test_parse_minimal_document() {
        let lap = LapDocument::from_json(MINIMAL).unwrap().into_lap().unwrap();

        assert_eq!(lap.len(), 3);
        assert_eq!(lap.max_index(), 2);
        assert_eq!(lap.info().driver, "LEC");
        assert_eq!(lap.info().location, "Monza");
        assert_eq!(lap.info().event_name.as_deref(), Some("Italian Grand Prix"));
        assert_eq!(lap.samples().brake(), &[0.0, 0.0, 100.0]);
        assert_eq!(lap.corners().len(), 1);
        assert_eq!(lap.corners()[0].label(), "1");
    }

    #[test]
    fn test_numeric_brake_is_kept() {
        let json = MINIMAL.replace("[false, false, true]", "[0, 35.5, 100]");
        let lap = LapDocument::from_json(&json).unwrap().into_lap().unwrap();
        assert_eq!(lap.samples().brake(), &[0.0, 35.5, 100.0]);
    }

    #[test]
    fn test_empty_telemetry_is_rejected() {
        let doc = LapDocument {
            driver: "X".into(),
            lap_number: 1,
            event: EventDocument::default(),
            telemetry: TelemetryColumns::default(),
            position: PositionColumns {
                x: vec![0.0],
                y: vec![0.0],
            },
            circuit: CircuitDocument::default(),
        };
        assert_eq!(doc.into_lap(), Err(LapError::EmptySamples));
    }

    #[test]
    fn test_misaligned_telemetry_is_rejected() {
        let json = MINIMAL.replace("[300.0, 310.0, 250.0]", "[300.0, 310.0]");
        let err = LapDocument::from_json(&json).unwrap().into_lap().unwrap_err();
        assert!(matches!(
            err,
            LapError::LengthMismatch {
                column: "speed",
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_is_unavailable() {
        let err = LapDocument::from_json("{ not json").unwrap_err();
        assert!(matches!(err, LapError::DataUnavailable(_)));
    }

    #[test]
    fn test_positions_resampled_to_telemetry() {
        let json = MINIMAL.replace(
            r#""x": [0.0, 100.0, 200.0], "y": [0.0, 0.0, 0.0]"#,
            r#""x": [0.0, 200.0], "y": [0.0, 0.0]"#,
        );
        let lap = LapDocument::from_json(&json).unwrap().into_lap().unwrap();
        let xs: Vec<f64> = lap.samples().position().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 100.0, 200.0]);
    }

    #[test]
    fn test_track_is_rotated() {
        let json = MINIMAL.replace(r#""rotation": 0.0"#, r#""rotation": 90.0"#);
        let lap = LapDocument::from_json(&json).unwrap().into_lap().unwrap();
        let last = lap.samples().position()[2];
        assert!(last.x.abs() < 1e-6);
        assert!((last.y - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_single_point() {
        let pts = resample(&[5.0], &[7.0], 3);
        assert_eq!(pts, vec![Point2::new(5.0, 7.0); 3]);
    }
}
