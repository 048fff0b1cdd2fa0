//! Decides which samples are worth persisting.
//!
//! Idle samples only feed a short pre-roll ring. When movement starts the ring
//! is flushed and every sample is kept until movement has been absent for the
//! post-roll count.

use std::collections::VecDeque;

use log::info;
use serde::Serialize;

use crate::detector::OccupancyState;
use crate::sensor::SensorSample;
use crate::storage::{Storage, WriteOutcome};

pub const PRE_ROLL_SAMPLES: usize = 5;
pub const POST_ROLL_SAMPLES: u32 = 5;

/// A sample together with the state it was classified as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Captured {
    pub sample: SensorSample,
    pub state: OccupancyState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStatus {
    pub is_recording: bool,
    pub post_roll_remaining: u32,
    pub pre_roll_depth: usize,
    pub events: u64,
}

pub struct RecordingController {
    pre_roll: VecDeque<Captured>,
    pre_roll_capacity: usize,
    post_roll_max: u32,
    post_roll_remaining: u32,
    is_recording: bool,
    events: u64,
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new(PRE_ROLL_SAMPLES, POST_ROLL_SAMPLES)
    }
}

impl RecordingController {
    pub fn new(pre_roll: usize, post_roll: u32) -> Self {
        Self {
            pre_roll: VecDeque::with_capacity(pre_roll),
            pre_roll_capacity: pre_roll,
            post_roll_max: post_roll,
            post_roll_remaining: 0,
            is_recording: false,
            events: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            is_recording: self.is_recording,
            post_roll_remaining: self.post_roll_remaining,
            pre_roll_depth: self.pre_roll.len(),
            events: self.events,
        }
    }

    /// Feeds one classified sample; returns what should be persisted, oldest first.
    pub fn on_sample(&mut self, captured: Captured, movement_threshold: f64) -> Vec<Captured> {
        let moving = captured.sample.variance > movement_threshold;

        match (self.is_recording, moving) {
            (false, false) => {
                if self.pre_roll_capacity > 0 {
                    if self.pre_roll.len() == self.pre_roll_capacity {
                        self.pre_roll.pop_front();
                    }
                    self.pre_roll.push_back(captured);
                }
                Vec::new()
            }
            (false, true) => {
                self.is_recording = true;
                self.post_roll_remaining = self.post_roll_max;
                self.events += 1;
                info!(
                    "Movement detected (variance {:.4}), recording with {} pre-roll samples",
                    captured.sample.variance,
                    self.pre_roll.len()
                );
                let mut batch: Vec<Captured> = self.pre_roll.drain(..).collect();
                batch.push(captured);
                batch
            }
            (true, true) => {
                self.post_roll_remaining = self.post_roll_max;
                vec![captured]
            }
            (true, false) => {
                self.post_roll_remaining = self.post_roll_remaining.saturating_sub(1);
                if self.post_roll_remaining == 0 {
                    self.is_recording = false;
                    info!("Movement settled, recording stopped");
                }
                vec![captured]
            }
        }
    }

    /// [`Self::on_sample`] followed by handing the selected samples to storage.
    ///
    /// A movement trigger and its pre-roll go to storage as one batch, so an
    /// event is never half written.
    pub async fn record(
        &mut self,
        captured: Captured,
        movement_threshold: f64,
        storage: &Storage,
    ) -> Vec<WriteOutcome> {
        let readings = self
            .on_sample(captured, movement_threshold)
            .into_iter()
            .map(|Captured { sample, state }| {
                let mut reading = storage.new_reading(
                    sample.voltage,
                    sample.force_percent,
                    state,
                    sample.variance,
                    sample.synthetic,
                );
                reading.timestamp = sample.timestamp;
                reading
            })
            .collect();
        storage.store_batch(readings).await
    }
}
