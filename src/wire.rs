//! Interchange record handed to an uplink for one stored reading.
//!
//! Field names and presence are a stable contract. `simulated` only appears
//! on readings produced from synthetic data.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Reading;
use crate::detector::OccupancyState;

pub const SENSOR_TYPE: &str = "fsr408";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireReading {
    pub timestamp: DateTime<Utc>,
    pub sensor_type: String,
    pub channel: u8,
    pub voltage: f64,
    pub force_percent: f64,
    pub state: OccupancyState,
    pub variance: f64,
    pub device_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl WireReading {
    pub fn from_reading(reading: &Reading, channel: u8) -> Self {
        Self {
            timestamp: reading.timestamp,
            sensor_type: SENSOR_TYPE.to_string(),
            channel,
            voltage: reading.voltage,
            force_percent: reading.force_percent,
            state: reading.state,
            variance: reading.variance,
            device_id: reading.device_id.clone(),
            user_id: reading.user_id.clone(),
            simulated: reading.synthetic,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize wire reading")
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize wire reading")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;

    fn reading(synthetic: bool) -> Reading {
        Reading {
            id: 42,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 3, 14, 30, 0).unwrap(),
            voltage: 2.45,
            force_percent: 67.5,
            state: OccupancyState::Asleep,
            variance: 0.02,
            device_id: "rpi_node_1".into(),
            user_id: "user_001".into(),
            synthetic,
            synced: false,
        }
    }

    #[test]
    fn real_reading_has_exact_field_set() {
        let wire = WireReading::from_reading(&reading(false), 0);
        let value: Value = serde_json::from_str(&wire.to_json_pretty().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "timestamp": "2026-02-03T14:30:00Z",
                "sensor_type": "fsr408",
                "channel": 0,
                "voltage": 2.45,
                "force_percent": 67.5,
                "state": "Asleep",
                "variance": 0.02,
                "device_id": "rpi_node_1",
                "user_id": "user_001",
            })
        );
    }

    #[test]
    fn synthetic_reading_is_flagged() {
        let wire = WireReading::from_reading(&reading(true), 2);
        let value: Value = serde_json::from_str(&wire.to_json().unwrap()).unwrap();
        assert_eq!(value["simulated"], json!(true));
        assert_eq!(value["channel"], json!(2));

        let back: WireReading = serde_json::from_value(value).unwrap();
        assert_eq!(back, wire);
    }

    #[test]
    fn every_state_uses_its_label() {
        for state in [
            OccupancyState::Empty,
            OccupancyState::Awake,
            OccupancyState::Asleep,
            OccupancyState::Moving,
        ] {
            let mut r = reading(false);
            r.state = state;
            let value = serde_json::to_value(WireReading::from_reading(&r, 0)).unwrap();
            assert_eq!(value["state"], json!(state.as_str()));
        }
    }
}
