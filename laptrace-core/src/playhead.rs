//! Play-head arithmetic
//!
//! The play-head is an index into a lap of `len` samples. Autonomous ticks
//! wrap around at the end of the lap; seeks are clamped into `[0, len - 1]`,
//! so a request of `-1` lands on the first sample and anything past the end
//! lands on the last one.
//!
//! [`parse_seek_index`] turns the loosely typed value a viewer sends into an
//! integer before it reaches the play-head.

use serde_json::Value;

use crate::error::{LapError, SeekError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayHead {
    index: usize,
    len: usize,
}

impl PlayHead {
    /// A play-head at index 0. Fails for an empty lap.
    pub fn new(len: usize) -> Result<Self, LapError> {
        if len == 0 {
            return Err(LapError::EmptySamples);
        }
        Ok(Self { index: 0, len })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_index(&self) -> usize {
        self.len - 1
    }

    /// Move one sample forward, wrapping to 0 after the last sample
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.len;
        self.index
    }

    /// Jump to `requested`, clamped into range
    pub fn seek(&mut self, requested: i64) -> usize {
        self.index = self.clamp(requested);
        self.index
    }

    pub fn clamp(&self, requested: i64) -> usize {
        if requested <= 0 {
            0
        } else {
            (requested as u64).min(self.max_index() as u64) as usize
        }
    }
}

/// Interpret a seek value sent by a viewer as an integer.
///
/// Accepts integers, finite floats (truncated toward zero) and strings holding
/// an integer. Booleans, null, arrays and objects are rejected.
pub fn parse_seek_index(value: &Value) -> Result<i64, SeekError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.as_u64().is_some() {
                Ok(i64::MAX)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() => Ok(f.trunc() as i64),
                    _ => Err(SeekError::Invalid(n.to_string())),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| SeekError::Invalid(format!("'{}'", s))),
        other => Err(SeekError::Invalid(other.to_string())),
    }
}
