use serde::{Deserialize, Serialize};

/// Occupancy / sleep classification of a single sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum OccupancyState {
    #[default]
    #[serde(rename = "Empty Bed")]
    Empty,
    #[serde(rename = "Present (Awake)")]
    Awake,
    #[serde(rename = "Asleep")]
    Asleep,
    #[serde(rename = "Tossing/Turning")]
    Moving,
}

impl OccupancyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyState::Empty => "Empty Bed",
            OccupancyState::Awake => "Present (Awake)",
            OccupancyState::Asleep => "Asleep",
            OccupancyState::Moving => "Tossing/Turning",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OccupancyState::Empty => "EMPTY",
            OccupancyState::Awake => "AWAKE",
            OccupancyState::Asleep => "ASLEEP",
            OccupancyState::Moving => "MOVING",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "Empty Bed" => Some(OccupancyState::Empty),
            "Present (Awake)" => Some(OccupancyState::Awake),
            "Asleep" => Some(OccupancyState::Asleep),
            "Tossing/Turning" => Some(OccupancyState::Moving),
            _ => None,
        }
    }
}

impl std::fmt::Display for OccupancyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
