//! Type-safe wrappers for physical units
//!
//! Newtypes around f64 so car telemetry channels cannot be mixed up
//! (a throttle percentage is not a speed).
//!
//! All unit types serialize with 4 decimal places to reduce JSON payload size.

use serde::{Deserialize, Serialize};

/// Round f64 to 4 decimal places for compact JSON serialization
fn round4<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((*val * 10000.0).round() / 10000.0)
}

/// Kilometers per hour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KilometersPerHour(#[serde(serialize_with = "round4")] pub f64);

impl KilometersPerHour {
    pub fn as_meters_per_second(&self) -> f64 {
        self.0 / 3.6
    }
}

/// Revolutions per minute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rpm(#[serde(serialize_with = "round4")] pub f64);

/// Percentage on the 0-100 scale used by pedal channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percent(#[serde(serialize_with = "round4")] pub f64);

impl Percent {
    /// Create a new percentage, clamping to [0, 100]
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 100.0))
    }

    /// Get as a fraction (0.0 to 1.0)
    pub fn as_fraction(&self) -> f64 {
        self.0 / 100.0
    }
}
