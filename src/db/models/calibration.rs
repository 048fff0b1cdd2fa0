use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Singleton calibration record; re-calibration overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Calibration {
    pub baseline_voltage: f64,
    pub occupied_threshold: f64,
    pub movement_threshold: f64,
    pub calibrated_at: DateTime<Utc>,
}

impl Calibration {
    pub const DEFAULT_BASELINE: f64 = 0.5;
    pub const DEFAULT_OCCUPIED: f64 = 2.0;
    pub const DEFAULT_MOVEMENT: f64 = 0.05;
    /// Movement threshold used with the synthetic occupant.
    pub const SYNTHETIC_MOVEMENT: f64 = 0.1;

    /// Factory defaults, used until a calibration has run.
    pub fn uncalibrated() -> Self {
        Self {
            baseline_voltage: Self::DEFAULT_BASELINE,
            occupied_threshold: Self::DEFAULT_OCCUPIED,
            movement_threshold: Self::DEFAULT_MOVEMENT,
            calibrated_at: DateTime::<Utc>::default(),
        }
    }

    /// Width of the 0-100% force scale; non-positive means force reads 0.
    pub fn force_range(&self) -> f64 {
        self.occupied_threshold - self.baseline_voltage
    }
}
