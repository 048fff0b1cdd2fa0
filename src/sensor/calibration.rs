use std::io::{self, BufRead, Write};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use super::{ForceSensor, SensorError, VoltageSource};
use crate::db::Calibration;

const MIN_MOVEMENT_THRESHOLD: f64 = 0.05;
const MOVEMENT_FRACTION: f64 = 0.10;
const SMALL_RANGE_VOLTS: f64 = 0.5;

/// How the operator is walked through the two calibration phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Waits for ENTER on stdin before each phase.
    Interactive,
    /// Waits a fixed settle time before each phase.
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    EmptyBed,
    Occupied,
}

impl CalibrationStep {
    fn label(self) -> &'static str {
        match self {
            CalibrationStep::EmptyBed => "empty bed",
            CalibrationStep::Occupied => "occupied",
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            CalibrationStep::EmptyBed => "Make sure the bed is EMPTY, then press ENTER...",
            CalibrationStep::Occupied => {
                "Lie on the bed in your normal sleeping position, then press ENTER..."
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    pub samples: usize,
    /// Collection time per phase; samples are spread evenly across it.
    pub window: Duration,
    /// Wait before each phase in [`CalibrationMode::Timed`].
    pub settle: Duration,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            samples: 50,
            window: Duration::from_secs(5),
            settle: Duration::from_secs(5),
        }
    }
}

impl<S: VoltageSource> ForceSensor<S> {
    /// Runs both calibration phases, blocking the calling thread.
    ///
    /// The caller persists the result.
    pub fn calibrate(
        &mut self,
        mode: CalibrationMode,
        options: &CalibrationOptions,
    ) -> Result<Calibration, SensorError> {
        let settle = options.settle;
        self.calibrate_with(options, |step| match mode {
            CalibrationMode::Interactive => prompt(step),
            CalibrationMode::Timed => {
                info!("Measuring {} in {:?}", step.label(), settle);
                std::thread::sleep(settle);
                Ok(())
            }
        })
    }

    /// Same as [`Self::calibrate`] with a caller-supplied wait before each phase.
    pub fn calibrate_with(
        &mut self,
        options: &CalibrationOptions,
        mut wait: impl FnMut(CalibrationStep) -> Result<(), SensorError>,
    ) -> Result<Calibration, SensorError> {
        if self.is_synthetic() {
            info!("Calibrating against synthetic data, using preset values");
            let calibration = Calibration {
                movement_threshold: Calibration::SYNTHETIC_MOVEMENT,
                calibrated_at: Utc::now(),
                ..Calibration::uncalibrated()
            };
            self.calibration = calibration.clone();
            self.calibrated = true;
            return Ok(calibration);
        }

        wait(CalibrationStep::EmptyBed)?;
        let (baseline, baseline_sd) = self.measure(CalibrationStep::EmptyBed, options)?;
        info!("Baseline measured: {baseline:.3} V (±{baseline_sd:.3} V)");

        wait(CalibrationStep::Occupied)?;
        let (occupied, occupied_sd) = self.measure(CalibrationStep::Occupied, options)?;
        info!("Occupied measured: {occupied:.3} V (±{occupied_sd:.3} V)");

        let range = occupied - baseline;
        let movement = (range.abs() * MOVEMENT_FRACTION).max(MIN_MOVEMENT_THRESHOLD);
        if range <= 0.0 {
            warn!("Occupied voltage is not above baseline; force will read 0%");
        } else if range < SMALL_RANGE_VOLTS {
            warn!("Small calibration range ({range:.3} V), check sensor placement");
        }

        let calibration = Calibration {
            baseline_voltage: baseline,
            occupied_threshold: occupied,
            movement_threshold: movement,
            calibrated_at: Utc::now(),
        };
        info!("Calibration complete, movement threshold {movement:.3}");

        self.calibration = calibration.clone();
        self.calibrated = true;
        Ok(calibration)
    }

    /// Mean and sample standard deviation over one phase; failed reads are skipped.
    fn measure(
        &mut self,
        step: CalibrationStep,
        options: &CalibrationOptions,
    ) -> Result<(f64, f64), SensorError> {
        let count = options.samples.max(1);
        let interval = options.window / count as u32;
        let mut samples = Vec::with_capacity(count);

        for _ in 0..count {
            match self.try_read_voltage() {
                Ok(voltage) => samples.push(voltage),
                Err(err) => warn!("Skipping failed calibration sample: {err}"),
            }
            if !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }

        if samples.is_empty() {
            return Err(SensorError::NoSamples(step.label()));
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let sd = if samples.len() > 1 {
            (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Ok((mean, sd))
    }
}

fn prompt(step: CalibrationStep) -> Result<(), SensorError> {
    let mut stdout = io::stdout();
    writeln!(stdout, "\n{}", step.instructions())?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}
