//! Occupancy / sleep state machine.
//!
//! Evaluated once per sample. Rule precedence is fixed: an empty bed beats
//! movement, and movement beats how long the occupant has been still.

mod state;

use std::time::{Duration, Instant};

use log::info;
use serde::Serialize;

use crate::db::Calibration;

pub use state::OccupancyState;

/// Thresholds for the state machine.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Voltage below which the bed counts as empty.
    pub empty_threshold: f64,
    /// Variance above which the occupant counts as moving.
    pub movement_threshold: f64,
    /// Stillness required before the occupant counts as asleep.
    pub sleep_delay: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            empty_threshold: 0.8,
            movement_threshold: 0.05,
            sleep_delay: Duration::from_secs(60),
        }
    }
}

impl DetectorConfig {
    /// Seeds thresholds from a calibration: the bed is empty until the
    /// voltage clears the baseline by `empty_margin`.
    pub fn from_calibration(
        calibration: &Calibration,
        empty_margin: f64,
        sleep_delay: Duration,
    ) -> Self {
        Self {
            empty_threshold: calibration.baseline_voltage + empty_margin,
            movement_threshold: calibration.movement_threshold,
            sleep_delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTransition {
    pub from: OccupancyState,
    pub to: OccupancyState,
    pub entered_at: Instant,
    pub previous_duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorStats {
    pub state: OccupancyState,
    pub state_code: &'static str,
    pub time_in_state_secs: f64,
    pub time_since_movement_secs: f64,
    pub last_voltage: f64,
    pub last_variance: f64,
    pub is_occupied: bool,
    pub is_sleeping: bool,
}

pub struct SleepDetector {
    config: DetectorConfig,
    current: OccupancyState,
    state_entered_at: Instant,
    last_movement_at: Instant,
    last_voltage: f64,
    last_variance: f64,
    last_transition: Option<StateTransition>,
}

impl SleepDetector {
    pub fn new(config: DetectorConfig, now: Instant) -> Self {
        info!(
            "SleepDetector: empty < {:.3}V, movement > {:.3}, sleep after {}s still",
            config.empty_threshold,
            config.movement_threshold,
            config.sleep_delay.as_secs_f64()
        );

        Self {
            config,
            current: OccupancyState::Empty,
            state_entered_at: now,
            last_movement_at: now,
            last_voltage: 0.0,
            last_variance: 0.0,
            last_transition: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn movement_threshold(&self) -> f64 {
        self.config.movement_threshold
    }

    pub fn update(&mut self, voltage: f64, variance: f64, now: Instant) -> OccupancyState {
        self.last_voltage = voltage;
        self.last_variance = variance;

        let next = if voltage < self.config.empty_threshold {
            self.last_movement_at = now;
            OccupancyState::Empty
        } else if variance > self.config.movement_threshold {
            self.last_movement_at = now;
            OccupancyState::Moving
        } else if now.saturating_duration_since(self.last_movement_at) > self.config.sleep_delay {
            OccupancyState::Asleep
        } else {
            OccupancyState::Awake
        };

        if next != self.current {
            let previous_duration = now.saturating_duration_since(self.state_entered_at);
            info!(
                "State change: {} -> {} (was {:.1}s in previous state)",
                self.current,
                next,
                previous_duration.as_secs_f64()
            );
            self.last_transition = Some(StateTransition {
                from: self.current,
                to: next,
                entered_at: now,
                previous_duration,
            });
            self.current = next;
            self.state_entered_at = now;
        }

        self.current
    }

    pub fn state(&self) -> OccupancyState {
        self.current
    }

    pub fn last_transition(&self) -> Option<StateTransition> {
        self.last_transition
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    pub fn time_since_last_movement(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_movement_at)
    }

    pub fn is_occupied(&self) -> bool {
        self.current != OccupancyState::Empty
    }

    pub fn is_sleeping(&self) -> bool {
        self.current == OccupancyState::Asleep
    }

    pub fn stats(&self, now: Instant) -> DetectorStats {
        DetectorStats {
            state: self.current,
            state_code: self.current.code(),
            time_in_state_secs: self.time_in_state(now).as_secs_f64(),
            time_since_movement_secs: self.time_since_last_movement(now).as_secs_f64(),
            last_voltage: self.last_voltage,
            last_variance: self.last_variance,
            is_occupied: self.is_occupied(),
            is_sleeping: self.is_sleeping(),
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.current = OccupancyState::Empty;
        self.state_entered_at = now;
        self.last_movement_at = now;
        self.last_transition = None;
        info!("SleepDetector reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(now: Instant) -> SleepDetector {
        SleepDetector::new(
            DetectorConfig {
                empty_threshold: 1.0,
                movement_threshold: 0.05,
                sleep_delay: Duration::from_secs(3),
            },
            now,
        )
    }

    fn at(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    #[test]
    fn walks_through_a_night() {
        let t0 = Instant::now();
        let mut detector = detector(t0);

        let steps = [
            (0, 0.5, 0.01, OccupancyState::Empty),
            (1_000, 2.5, 0.08, OccupancyState::Moving),
            (2_000, 2.5, 0.02, OccupancyState::Awake),
            (5_500, 2.5, 0.02, OccupancyState::Asleep),
            (6_000, 2.5, 0.10, OccupancyState::Moving),
            (7_000, 0.6, 0.01, OccupancyState::Empty),
        ];

        for (offset, voltage, variance, expected) in steps {
            assert_eq!(detector.update(voltage, variance, at(t0, offset)), expected);
        }
    }

    #[test]
    fn emptiness_dominates_movement() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        assert_eq!(detector.update(0.2, 5.0, t0), OccupancyState::Empty);
    }

    #[test]
    fn stillness_must_exceed_delay() {
        let t0 = Instant::now();
        let mut detector = detector(t0);

        detector.update(2.5, 0.08, t0);
        assert_eq!(detector.update(2.5, 0.0, at(t0, 3_000)), OccupancyState::Awake);
        assert_eq!(detector.update(2.5, 0.0, at(t0, 3_001)), OccupancyState::Asleep);
        assert!(detector.is_sleeping());
        assert!(detector.is_occupied());
    }

    #[test]
    fn empty_bed_restarts_the_sleep_clock() {
        let t0 = Instant::now();
        let mut detector = detector(t0);

        detector.update(2.5, 0.0, t0);
        detector.update(0.1, 0.0, at(t0, 10_000));
        assert_eq!(detector.update(2.5, 0.0, at(t0, 11_000)), OccupancyState::Awake);
    }

    #[test]
    fn transitions_are_observable() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        assert!(detector.last_transition().is_none());

        detector.update(2.5, 0.2, at(t0, 1_500));
        let transition = detector.last_transition().unwrap();
        assert_eq!(transition.from, OccupancyState::Empty);
        assert_eq!(transition.to, OccupancyState::Moving);
        assert_eq!(transition.entered_at, at(t0, 1_500));
        assert_eq!(transition.previous_duration, Duration::from_millis(1_500));

        // no change, no new transition
        detector.update(2.5, 0.2, at(t0, 2_000));
        assert_eq!(detector.last_transition().unwrap().entered_at, at(t0, 1_500));
        assert_eq!(detector.time_in_state(at(t0, 2_500)), Duration::from_secs(1));
    }

    #[test]
    fn reset_returns_to_empty() {
        let t0 = Instant::now();
        let mut detector = detector(t0);
        detector.update(2.5, 0.2, t0);

        detector.reset(at(t0, 100));
        assert_eq!(detector.state(), OccupancyState::Empty);
        assert_eq!(detector.time_since_last_movement(at(t0, 600)), Duration::from_millis(500));

        let stats = detector.stats(at(t0, 600));
        assert_eq!(stats.state_code, "EMPTY");
        assert!(!stats.is_occupied);
    }

    #[test]
    fn thresholds_follow_calibration() {
        let calibration = Calibration {
            baseline_voltage: 0.5,
            occupied_threshold: 2.0,
            movement_threshold: 0.15,
            calibrated_at: chrono::Utc::now(),
        };
        let config = DetectorConfig::from_calibration(&calibration, 0.2, Duration::from_secs(60));

        assert!((config.empty_threshold - 0.7).abs() < 1e-9);
        assert_eq!(config.movement_threshold, 0.15);
    }
}
