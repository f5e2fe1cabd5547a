//! Recorded Lap Model
//!
//! A [`Lap`] is the immutable sample store for one recorded lap: the
//! index-aligned [`SampleTable`], the circuit's [`CornerAnnotation`]s and the
//! descriptive [`LapInfo`]. It is built once at startup from a [`LapSource`]
//! and never mutated afterwards.
//!
//! All positions held here are already rotated into display orientation.

use nalgebra::{Point2, Rotation2, Vector2};
use serde::Serialize;

use crate::error::LapError;

pub mod document;
pub mod synthetic;

pub use document::LapDocument;
pub use synthetic::SyntheticLap;

/// Length of the leader line from a corner to its label, in track units
pub const CORNER_LABEL_OFFSET: f64 = 500.0;

/// Rotate a point counter-clockwise around the origin
pub fn rotate(point: Point2<f64>, angle_rad: f64) -> Point2<f64> {
    Rotation2::new(angle_rad) * point
}

/// One index-aligned row of the sample table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub distance: f64,
    pub throttle: f64,
    pub brake: f64,
    pub speed: f64,
    pub position: Point2<f64>,
}

/// Index-aligned telemetry and position columns.
///
/// Every column has the same length `N >= 1`; the index is the only identity
/// a sample has.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    distance: Vec<f64>,
    throttle: Vec<f64>,
    brake: Vec<f64>,
    speed: Vec<f64>,
    position: Vec<Point2<f64>>,
}

impl SampleTable {
    /// Build a table, checking that it is non-empty and every column is aligned
    pub fn new(
        distance: Vec<f64>,
        throttle: Vec<f64>,
        brake: Vec<f64>,
        speed: Vec<f64>,
        position: Vec<Point2<f64>>,
    ) -> Result<Self, LapError> {
        let expected = distance.len();
        if expected == 0 {
            return Err(LapError::EmptySamples);
        }
        for (column, actual) in [
            ("throttle", throttle.len()),
            ("brake", brake.len()),
            ("speed", speed.len()),
            ("position", position.len()),
        ] {
            if actual != expected {
                return Err(LapError::LengthMismatch {
                    column,
                    expected,
                    actual,
                });
            }
        }

        Ok(Self {
            distance,
            throttle,
            brake,
            speed,
            position,
        })
    }

    /// Number of samples (`N`)
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    /// Always false for a constructed table, kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    /// Highest valid index (`N - 1`)
    pub fn max_index(&self) -> usize {
        self.len() - 1
    }

    pub fn distance(&self) -> &[f64] {
        &self.distance
    }

    pub fn throttle(&self) -> &[f64] {
        &self.throttle
    }

    pub fn brake(&self) -> &[f64] {
        &self.brake
    }

    pub fn speed(&self) -> &[f64] {
        &self.speed
    }

    /// Rotated track coordinates
    pub fn position(&self) -> &[Point2<f64>] {
        &self.position
    }

    /// Get a single row, or None if `index >= N`
    pub fn sample(&self, index: usize) -> Option<Sample> {
        if index >= self.len() {
            return None;
        }
        Some(Sample {
            distance: self.distance[index],
            throttle: self.throttle[index],
            brake: self.brake[index],
            speed: self.speed[index],
            position: self.position[index],
        })
    }
}

/// A numbered corner of the circuit, with its label placement precomputed
#[derive(Debug, Clone, PartialEq)]
pub struct CornerAnnotation {
    pub number: u32,
    pub letter: String,
    /// Corner position on the (rotated) track
    pub position: Point2<f64>,
    /// Direction of the label offset, in degrees, relative to the unrotated circuit
    pub angle: f64,
    /// Where the label sits (rotated), `CORNER_LABEL_OFFSET` away from `position`
    pub label_position: Point2<f64>,
}

impl CornerAnnotation {
    /// Build an annotation from unrotated circuit coordinates.
    ///
    /// The label offset is turned by the corner angle first, then both points
    /// are turned by the circuit rotation.
    pub fn from_circuit(
        number: u32,
        letter: &str,
        raw: Point2<f64>,
        angle_deg: f64,
        rotation_rad: f64,
    ) -> Self {
        let offset = Rotation2::new(angle_deg.to_radians())
            * Vector2::new(CORNER_LABEL_OFFSET, 0.0);
        let label_raw = raw + offset;
        Self {
            number,
            letter: letter.to_string(),
            position: rotate(raw, rotation_rad),
            angle: angle_deg,
            label_position: rotate(label_raw, rotation_rad),
        }
    }

    /// Text drawn on the label, e.g. "1" or "11A"
    pub fn label(&self) -> String {
        format!("{}{}", self.number, self.letter)
    }
}

/// Descriptive metadata shown in frame titles and the lap API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapInfo {
    pub driver: String,
    pub lap_number: u32,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

/// The immutable sample store for one lap
#[derive(Debug, Clone, PartialEq)]
pub struct Lap {
    samples: SampleTable,
    corners: Vec<CornerAnnotation>,
    info: LapInfo,
}

impl Lap {
    pub fn new(samples: SampleTable, corners: Vec<CornerAnnotation>, info: LapInfo) -> Self {
        Self {
            samples,
            corners,
            info,
        }
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    pub fn corners(&self) -> &[CornerAnnotation] {
        &self.corners
    }

    pub fn info(&self) -> &LapInfo {
        &self.info
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_index(&self) -> usize {
        self.samples.max_index()
    }
}

/// Anything that can produce a lap at startup.
///
/// Implementations run once, synchronously, before any viewer is served.
pub trait LapSource {
    /// Human readable description for logging
    fn describe(&self) -> String;

    /// Load and validate the lap
    fn load(&self) -> Result<Lap, LapError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn points(n: usize) -> Vec<Point2<f64>> {
        (0..n).map(|i| Point2::new(i as f64, 0.0)).collect()
    }

    #[test]
    fn test_table_rejects_empty() {
        let result = SampleTable::new(vec![], vec![], vec![], vec![], vec![]);
        assert_eq!(result, Err(LapError::EmptySamples));
    }

    #[test]
    fn test_table_rejects_misaligned_columns() {
        let result = SampleTable::new(
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0, 2.0],
            points(3),
        );
        assert_eq!(
            result,
            Err(LapError::LengthMismatch {
                column: "brake",
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_sample_lookup() {
        let table = SampleTable::new(
            vec![0.0, 10.0],
            vec![100.0, 50.0],
            vec![0.0, 100.0],
            vec![200.0, 150.0],
            points(2),
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.max_index(), 1);
        let s = table.sample(1).unwrap();
        assert_eq!(s.distance, 10.0);
        assert_eq!(s.brake, 100.0);
        assert_eq!(s.position, Point2::new(1.0, 0.0));
        assert!(table.sample(2).is_none());
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let p = rotate(Point2::new(1.0, 0.0), FRAC_PI_2);
        assert!((p.x - 0.0).abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_corner_label_placement() {
        // Label straight "up" from the corner, circuit not rotated
        let corner = CornerAnnotation::from_circuit(3, "A", Point2::new(100.0, 200.0), 90.0, 0.0);
        assert_eq!(corner.label(), "3A");
        assert!((corner.label_position.x - 100.0).abs() < 1e-6);
        assert!((corner.label_position.y - (200.0 + CORNER_LABEL_OFFSET)).abs() < 1e-6);

        // Rotating the circuit by 180 degrees mirrors both points through the origin
        let corner =
            CornerAnnotation::from_circuit(1, "", Point2::new(100.0, 0.0), 0.0, std::f64::consts::PI);
        assert!((corner.position.x + 100.0).abs() < 1e-6);
        assert!((corner.label_position.x + 100.0 + CORNER_LABEL_OFFSET).abs() < 1e-6);
    }
}
