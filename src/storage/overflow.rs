use std::collections::VecDeque;

use crate::db::NewReading;

/// Bounded holding area for readings the store could not take.
///
/// At capacity the newest reading is refused so the oldest undelivered
/// history survives.
#[derive(Debug)]
pub struct OverflowQueue {
    entries: VecDeque<NewReading>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued { depth: usize },
    Full,
}

impl OverflowQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, reading: NewReading) -> Enqueued {
        if self.entries.len() >= self.capacity {
            return Enqueued::Full;
        }
        self.entries.push_back(reading);
        Enqueued::Queued {
            depth: self.entries.len(),
        }
    }

    /// Copy of the queued readings, oldest first.
    pub fn snapshot(&self) -> Vec<NewReading> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::detector::OccupancyState;

    fn reading(voltage: f64) -> NewReading {
        NewReading {
            timestamp: Utc::now(),
            voltage,
            force_percent: 0.0,
            state: OccupancyState::Empty,
            variance: 0.0,
            device_id: "d".into(),
            user_id: "u".into(),
            synthetic: false,
        }
    }

    #[test]
    fn refuses_newest_when_full() {
        let mut queue = OverflowQueue::new(2);

        assert_eq!(queue.push(reading(1.0)), Enqueued::Queued { depth: 1 });
        assert_eq!(queue.push(reading(2.0)), Enqueued::Queued { depth: 2 });
        assert_eq!(queue.push(reading(3.0)), Enqueued::Full);

        let kept: Vec<f64> = queue.snapshot().iter().map(|r| r.voltage).collect();
        assert_eq!(kept, vec![1.0, 2.0]);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 2);
    }
}
