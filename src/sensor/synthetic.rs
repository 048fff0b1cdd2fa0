use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const EMPTY_VOLTS: f64 = 0.5;
const OCCUPIED_VOLTS: f64 = 2.0;
const RESTLESS_VOLTS: f64 = 1.8;
const MAX_VOLTS: f64 = 3.3;

const RAMP: Duration = Duration::from_secs(5);
const SETTLE_BEFORE_RESTLESS: Duration = Duration::from_secs(20);
const RESTLESS_CHANCE: f64 = 0.02;
const GET_UP_CHANCE: f64 = 0.05;

/// Where the simulated occupant currently is in its night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Empty,
    GettingIn,
    Occupied,
    Restless,
    GettingUp,
}

/// Fabricates a plausible voltage stream for a bed with someone sleeping in it.
///
/// Cycles empty → getting in → occupied (with restless spells) → getting up.
/// Dwell times are drawn on entry to each phase; output stays within 0..3.3 V.
pub struct SyntheticOccupant {
    rng: StdRng,
    phase: Phase,
    started_at: Instant,
    phase_started_at: Instant,
    dwell: Duration,
    /// When the occupant last got into bed; restless spells do not reset it.
    settled_at: Instant,
    night: Duration,
}

impl SyntheticOccupant {
    pub fn new(now: Instant) -> Self {
        Self::with_rng(StdRng::from_entropy(), now)
    }

    pub fn seeded(seed: u64, now: Instant) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), now)
    }

    fn with_rng(rng: StdRng, now: Instant) -> Self {
        let mut occupant = Self {
            rng,
            phase: Phase::Empty,
            started_at: now,
            phase_started_at: now,
            dwell: Duration::ZERO,
            settled_at: now,
            night: Duration::ZERO,
        };
        occupant.dwell = occupant.draw_dwell(Phase::Empty);
        occupant
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn voltage_at(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let in_phase = now.saturating_duration_since(self.phase_started_at);
        let ramp = (in_phase.as_secs_f64() / RAMP.as_secs_f64()).min(1.0);
        let span = OCCUPIED_VOLTS - EMPTY_VOLTS;

        let voltage = match self.phase {
            Phase::Empty => {
                let v = EMPTY_VOLTS + self.gaussian(0.02);
                if in_phase > self.dwell {
                    self.enter(Phase::GettingIn, now);
                }
                v
            }
            Phase::GettingIn => {
                let v = EMPTY_VOLTS + span * ramp + self.gaussian(0.1);
                if ramp >= 1.0 {
                    self.enter(Phase::Occupied, now);
                }
                v
            }
            Phase::Occupied => {
                let breathing = 0.05 * (elapsed * 0.3).sin();
                let v = OCCUPIED_VOLTS + breathing + self.gaussian(0.03);
                if in_phase > SETTLE_BEFORE_RESTLESS && self.rng.gen_bool(RESTLESS_CHANCE) {
                    self.enter(Phase::Restless, now);
                } else if now.saturating_duration_since(self.settled_at) > self.night
                    && self.rng.gen_bool(GET_UP_CHANCE)
                {
                    self.enter(Phase::GettingUp, now);
                }
                v
            }
            Phase::Restless => {
                let shift = 0.3 * (elapsed * 2.0).sin();
                let v = RESTLESS_VOLTS + shift + self.gaussian(0.15);
                if in_phase > self.dwell {
                    self.enter(Phase::Occupied, now);
                }
                v
            }
            Phase::GettingUp => {
                let v = OCCUPIED_VOLTS - span * ramp + self.gaussian(0.1);
                if ramp >= 1.0 {
                    self.enter(Phase::Empty, now);
                }
                v
            }
        };

        voltage.clamp(0.0, MAX_VOLTS)
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        info!("Synthetic occupant: {:?} -> {:?}", self.phase, phase);
        if self.phase == Phase::GettingIn {
            self.settled_at = now;
            self.night = Duration::from_secs_f64(self.rng.gen_range(30.0..90.0));
        }
        self.phase = phase;
        self.phase_started_at = now;
        self.dwell = self.draw_dwell(phase);
    }

    fn draw_dwell(&mut self, phase: Phase) -> Duration {
        let secs = match phase {
            Phase::Empty => self.rng.gen_range(10.0..60.0),
            Phase::Restless => self.rng.gen_range(5.0..10.0),
            Phase::GettingIn | Phase::GettingUp | Phase::Occupied => RAMP.as_secs_f64(),
        };
        Duration::from_secs_f64(secs)
    }

    // Box-Muller
    fn gaussian(&mut self, std_dev: f64) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos() * std_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_whole_cycle_within_range() {
        let start = Instant::now();
        let mut occupant = SyntheticOccupant::seeded(7, start);
        let mut seen = vec![occupant.phase()];

        // an hour at 10 Hz
        for tick in 0..36_000u64 {
            let now = start + Duration::from_millis(tick * 100);
            let v = occupant.voltage_at(now);
            assert!((0.0..=MAX_VOLTS).contains(&v));
            if seen.last() != Some(&occupant.phase()) {
                seen.push(occupant.phase());
            }
        }

        for phase in [Phase::GettingIn, Phase::Occupied, Phase::Restless, Phase::GettingUp] {
            assert!(seen.contains(&phase), "never entered {phase:?}");
        }
        assert_eq!(seen[0], Phase::Empty);
        assert_eq!(seen[1], Phase::GettingIn);
        assert_eq!(seen[2], Phase::Occupied);
    }

    #[test]
    fn empty_bed_hovers_near_baseline() {
        let start = Instant::now();
        let mut occupant = SyntheticOccupant::seeded(1, start);
        let samples: Vec<f64> = (0..50)
            .map(|i| occupant.voltage_at(start + Duration::from_millis(i * 100)))
            .collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - EMPTY_VOLTS).abs() < 0.05, "mean {mean}");
    }
}
