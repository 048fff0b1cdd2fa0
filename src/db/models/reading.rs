//! Reading data model.
//!
//! A reading is the persisted unit of record: one classified sample. Only the
//! storage engine assigns `id` and flips `synced`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detector::OccupancyState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub force_percent: f64,
    pub state: OccupancyState,
    pub variance: f64,
    pub device_id: String,
    pub user_id: String,
    pub synthetic: bool,
    pub synced: bool,
}

/// A reading that has not been written yet (also the overflow queue entry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewReading {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub force_percent: f64,
    pub state: OccupancyState,
    pub variance: f64,
    pub device_id: String,
    pub user_id: String,
    pub synthetic: bool,
}

/// Aggregates over the readings table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadingCounts {
    pub total: u64,
    pub unsynced: u64,
    pub size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}
