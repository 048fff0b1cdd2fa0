//! FSR-408 force sensor on top of an ADC channel.
//!
//! Turns raw voltages into force percentages and a rolling variance, and
//! falls back to a synthetic occupant once the sensor looks disconnected.
//! The switch is one-way for the life of the process.

mod calibration;
mod synthetic;

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use embedded_hal::i2c::I2c;
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::adc::{AdcChannel, DeviceError};
use crate::db::Calibration;

pub use calibration::{CalibrationMode, CalibrationOptions, CalibrationStep};
pub use synthetic::{Phase, SyntheticOccupant};

/// Readings below this are treated as "nothing connected".
pub const NEAR_ZERO_VOLTS: f64 = 0.01;
/// Consecutive near-zero readings before the sensor is declared broken.
pub const BROKEN_STREAK: u32 = 10;
pub const DEFAULT_OCCUPIED_PERCENT: f64 = 20.0;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("calibration step '{0}' collected no samples")]
    NoSamples(&'static str),

    #[error("calibration prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Anything that can produce a voltage for the force sensor.
pub trait VoltageSource {
    fn read_voltage(&mut self) -> Result<f64, DeviceError>;
    fn channel(&self) -> u8;
}

impl<T: VoltageSource + ?Sized> VoltageSource for Box<T> {
    fn read_voltage(&mut self) -> Result<f64, DeviceError> {
        (**self).read_voltage()
    }

    fn channel(&self) -> u8 {
        (**self).channel()
    }
}

impl<I2C: I2c> VoltageSource for AdcChannel<I2C> {
    fn read_voltage(&mut self) -> Result<f64, DeviceError> {
        self.try_read_voltage()
    }

    fn channel(&self) -> u8 {
        AdcChannel::channel(self)
    }
}

/// One classified-ready sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub force_percent: f64,
    pub variance: f64,
    pub synthetic: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorData {
    pub voltage: f64,
    pub force_percent: f64,
    pub variance: f64,
    pub is_occupied: bool,
    pub channel: u8,
    pub calibrated: bool,
    pub synthetic: bool,
}

pub struct ForceSensor<S> {
    source: S,
    calibration: Calibration,
    calibrated: bool,
    buffer: VecDeque<f64>,
    buffer_capacity: usize,
    window_size: usize,
    last_voltage: f64,
    zero_streak: u32,
    synthetic: Option<SyntheticOccupant>,
}

impl<S: VoltageSource> ForceSensor<S> {
    pub fn new(source: S, window_size: usize, buffer_capacity: usize) -> Self {
        let window_size = window_size.max(2);
        Self {
            source,
            calibration: Calibration::uncalibrated(),
            calibrated: false,
            buffer: VecDeque::with_capacity(buffer_capacity),
            buffer_capacity: buffer_capacity.max(window_size),
            window_size,
            last_voltage: 0.0,
            zero_streak: 0,
            synthetic: None,
        }
    }

    /// Starts out on synthetic data regardless of what the hardware says.
    pub fn with_synthetic(mut self, occupant: SyntheticOccupant) -> Self {
        self.enter_synthetic(occupant);
        self
    }

    pub fn channel(&self) -> u8 {
        self.source.channel()
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic.is_some()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn load_calibration(&mut self, calibration: &Calibration) {
        self.calibration = calibration.clone();
        self.calibrated = true;
        log::info!(
            "Calibration loaded from {} (baseline {:.3} V, occupied {:.3} V, movement {:.3})",
            calibration.calibrated_at,
            calibration.baseline_voltage,
            calibration.occupied_threshold,
            calibration.movement_threshold
        );
    }

    fn enter_synthetic(&mut self, occupant: SyntheticOccupant) {
        warn!("Synthetic data mode enabled; readings are NOT from the sensor");
        self.synthetic = Some(occupant);
    }

    /// Reads one voltage, propagating device errors.
    pub fn try_read_voltage(&mut self) -> Result<f64, SensorError> {
        if let Some(occupant) = self.synthetic.as_mut() {
            let voltage = occupant.voltage_at(Instant::now());
            self.last_voltage = voltage;
            return Ok(voltage);
        }

        let voltage = self.source.read_voltage()?;
        self.last_voltage = voltage;
        self.track_near_zero(voltage);
        Ok(voltage)
    }

    /// Reads one voltage; on failure the last good value comes back instead.
    pub fn read_voltage(&mut self) -> f64 {
        match self.try_read_voltage() {
            Ok(voltage) => voltage,
            Err(err) => {
                error!(
                    "Failed to read FSR on channel {}, using last value {:.4} V: {err}",
                    self.channel(),
                    self.last_voltage
                );
                self.last_voltage
            }
        }
    }

    fn track_near_zero(&mut self, voltage: f64) {
        if voltage >= NEAR_ZERO_VOLTS {
            self.zero_streak = 0;
            return;
        }

        self.zero_streak += 1;
        if self.zero_streak == 1 {
            warn!(
                "FSR reads {voltage:.4} V on channel {}; check wiring, divider supply and channel",
                self.channel()
            );
        }
        if self.zero_streak >= BROKEN_STREAK {
            error!(
                "FSR read ~0 V for {} consecutive samples, assuming the sensor is broken",
                self.zero_streak
            );
            self.enter_synthetic(SyntheticOccupant::new(Instant::now()));
        }
    }

    fn push(&mut self, voltage: f64) {
        if self.buffer.len() == self.buffer_capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(voltage);
    }

    /// Population variance of the newest `window` buffered voltages.
    pub fn variance(&self, window: usize) -> f64 {
        let skip = self.buffer.len().saturating_sub(window);
        variance_of(self.buffer.iter().skip(skip).copied())
    }

    pub fn force_percentage(&self, voltage: f64) -> f64 {
        force_percent_of(voltage, &self.calibration)
    }

    /// Takes a fresh reading and reports its force on the calibrated scale.
    pub fn get_force_percentage(&mut self) -> f64 {
        let voltage = self.read_voltage();
        self.force_percentage(voltage)
    }

    /// Takes a fresh reading into the rolling buffer and returns the variance.
    pub fn get_variance(&mut self, window: Option<usize>) -> f64 {
        let voltage = self.read_voltage();
        self.push(voltage);
        self.variance(window.unwrap_or(self.window_size))
    }

    pub fn is_occupied(&mut self, threshold_percent: f64) -> bool {
        self.get_force_percentage() > threshold_percent
    }

    /// One reading with everything the classifier and recorder need.
    pub fn sample(&mut self) -> SensorSample {
        // the read that trips the broken-sensor switch is still a real one
        let synthetic = self.is_synthetic();
        let voltage = self.read_voltage();
        self.push(voltage);
        SensorSample {
            timestamp: Utc::now(),
            voltage,
            force_percent: self.force_percentage(voltage),
            variance: self.variance(self.window_size),
            synthetic,
        }
    }

    pub fn sensor_data(&mut self) -> SensorData {
        let sample = self.sample();
        SensorData {
            voltage: sample.voltage,
            force_percent: sample.force_percent,
            variance: sample.variance,
            is_occupied: sample.force_percent > DEFAULT_OCCUPIED_PERCENT,
            channel: self.channel(),
            calibrated: self.calibrated,
            synthetic: sample.synthetic,
        }
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

/// `(voltage - baseline) / range * 100`, clamped; 0 when the range is degenerate.
pub fn force_percent_of(voltage: f64, calibration: &Calibration) -> f64 {
    let range = calibration.force_range();
    if range <= 0.0 {
        return 0.0;
    }
    ((voltage - calibration.baseline_voltage) / range * 100.0).clamp(0.0, 100.0)
}

pub fn variance_of(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (count, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if count < 2 {
        return 0.0;
    }
    let mean = sum / count as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedSource;
    use super::*;
    use crate::adc::MockAds1115;
    use std::time::Duration;

    fn calibration(baseline: f64, occupied: f64) -> Calibration {
        Calibration {
            baseline_voltage: baseline,
            occupied_threshold: occupied,
            ..Calibration::uncalibrated()
        }
    }

    #[test]
    fn force_percentage_maps_the_calibrated_range() {
        let cal = calibration(0.5, 2.5);
        assert_eq!(force_percent_of(0.5, &cal), 0.0);
        assert_eq!(force_percent_of(2.5, &cal), 100.0);
        assert!((force_percent_of(1.5, &cal) - 50.0).abs() < 1e-9);
        assert_eq!(force_percent_of(0.1, &cal), 0.0);
        assert_eq!(force_percent_of(3.2, &cal), 100.0);

        assert_eq!(force_percent_of(1.0, &calibration(1.0, 1.0)), 0.0);
        assert_eq!(force_percent_of(1.0, &calibration(2.0, 1.0)), 0.0);
    }

    #[test]
    fn variance_uses_newest_window() {
        let mut sensor = ForceSensor::new(ScriptedSource::volts(&[5.0, 1.0, 3.0]), 2, 3);
        assert_eq!(sensor.get_variance(None), 0.0);
        assert_eq!(sensor.get_variance(None), 4.0);
        // window 2 over [1, 3]
        assert_eq!(sensor.get_variance(None), 1.0);
        assert!((sensor.variance(3) - variance_of([5.0, 1.0, 3.0].into_iter())).abs() < 1e-12);
    }

    #[test]
    fn rolling_buffer_evicts_oldest() {
        let mut sensor = ForceSensor::new(ScriptedSource::volts(&[9.0, 1.0, 1.0, 1.0]), 2, 3);
        for _ in 0..4 {
            sensor.sample();
        }
        assert_eq!(sensor.variance(10), 0.0);
    }

    #[test]
    fn failed_read_returns_last_good_voltage() {
        let mut sensor =
            ForceSensor::new(ScriptedSource::new([Some(1.7), None, Some(1.9)]), 20, 20);
        assert_eq!(sensor.read_voltage(), 1.7);
        assert_eq!(sensor.read_voltage(), 1.7);
        assert_eq!(sensor.read_voltage(), 1.9);
    }

    #[test]
    fn near_zero_streak_switches_to_synthetic_for_good() {
        let mut script = vec![0.0; 9];
        script.push(1.0);
        script.extend([0.0; 10]);
        script.push(2.0);
        let mut sensor = ForceSensor::new(ScriptedSource::volts(&script), 20, 20);

        for _ in 0..10 {
            sensor.read_voltage();
        }
        assert!(!sensor.is_synthetic(), "streak was broken by a real reading");

        for _ in 0..10 {
            sensor.read_voltage();
        }
        assert!(sensor.is_synthetic());

        let sample = sensor.sample();
        assert!(sample.synthetic);
        assert!((0.0..=3.3).contains(&sample.voltage));
        assert!(sensor.is_synthetic());
    }

    #[test]
    fn sample_that_trips_the_switch_stays_flagged_real() {
        let mut sensor = ForceSensor::new(ScriptedSource::volts(&[0.0; 10]), 20, 20);

        for _ in 0..9 {
            assert!(!sensor.sample().synthetic);
        }
        let tenth = sensor.sample();
        assert!(sensor.is_synthetic());
        assert!(!tenth.synthetic);
        assert_eq!(tenth.voltage, 0.0);

        assert!(sensor.sample().synthetic);
    }

    #[test]
    fn sensor_data_reports_occupancy_and_flags() {
        let mut sensor = ForceSensor::new(ScriptedSource::volts(&[2.0]), 20, 20);
        sensor.load_calibration(&calibration(0.5, 2.5));

        let data = sensor.sensor_data();
        assert_eq!(data.force_percent, 75.0);
        assert!(data.is_occupied);
        assert!(data.calibrated);
        assert!(!data.synthetic);
        assert!(sensor.is_occupied(DEFAULT_OCCUPIED_PERCENT));
        assert!(!sensor.is_occupied(80.0));
    }

    #[test]
    fn reads_through_mock_adc_channel() {
        let channel = AdcChannel::new(MockAds1115::mock_seeded(3), 0, Duration::from_millis(10));
        let mut sensor = ForceSensor::new(channel, 20, 20);

        let voltage = sensor.read_voltage();
        assert!(voltage > 0.9 && voltage < 3.3, "{voltage}");
        assert!(!sensor.is_synthetic());
    }
}
