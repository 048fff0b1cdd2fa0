//! Startup configuration.
//!
//! Read once from an optional JSON file, then patched from `SLEEPSENSE_*`
//! environment variables. Every field has a default so an empty or missing
//! file yields a working mock-free monitor on ADC channel 0.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::adc::{DataRate, Gain, RetryPolicy, DEFAULT_ADDRESS};
use crate::db::DatabaseOptions;
use crate::sensor::CalibrationOptions;
use crate::storage::StorageConfig;

pub const CONFIG_PATH_VAR: &str = "SLEEPSENSE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "sleepsense.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub i2c_bus: String,
    pub address: u8,
    pub channel: u8,
    pub gain: Gain,
    pub data_rate: DataRate,
    /// Never touch the bus; readings come from the driver's mock backend.
    pub mock: bool,
    /// Start on synthetic data even when real hardware is present.
    pub synthetic: bool,
    pub read_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            i2c_bus: "/dev/i2c-1".into(),
            address: DEFAULT_ADDRESS,
            channel: 0,
            gain: Gain::default(),
            data_rate: DataRate::default(),
            mock: false,
            synthetic: false,
            read_timeout_ms: 100,
            retry_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff_step: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub rate_hz: f64,
    pub variance_window: usize,
    pub buffer_capacity: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            variance_window: 20,
            buffer_capacity: 100,
        }
    }
}

impl SamplingConfig {
    const MIN_PERIOD: Duration = Duration::from_millis(1);
    const MAX_PERIOD: Duration = Duration::from_secs(3600);

    /// Tick period for `rate_hz`, kept within 1 ms ..= 1 h.
    pub fn period(&self) -> Duration {
        if self.rate_hz.is_nan() || self.rate_hz <= 0.0 {
            return Duration::from_millis(100);
        }
        Duration::try_from_secs_f64(1.0 / self.rate_hz)
            .unwrap_or(Self::MAX_PERIOD)
            .clamp(Self::MIN_PERIOD, Self::MAX_PERIOD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub sleep_delay_secs: u64,
    /// Volts above the calibrated baseline before the bed counts as occupied.
    pub empty_margin: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            sleep_delay_secs: 60,
            empty_margin: 0.2,
        }
    }
}

impl DetectorSettings {
    pub fn sleep_delay(&self) -> Duration {
        Duration::from_secs(self.sleep_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub samples: usize,
    pub window_ms: u64,
    pub settle_ms: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            samples: 50,
            window_ms: 5000,
            settle_ms: 5000,
        }
    }
}

impl CalibrationSettings {
    pub fn options(&self) -> CalibrationOptions {
        CalibrationOptions {
            samples: self.samples,
            window: Duration::from_millis(self.window_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub pre_roll: usize,
    pub post_roll: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            pre_roll: crate::recording::PRE_ROLL_SAMPLES,
            post_roll: crate::recording::POST_ROLL_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
    pub retention_days: i64,
    pub overflow_capacity: usize,
    pub cleanup_interval: u64,
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sleepsense.sqlite3"),
            retention_days: 30,
            overflow_capacity: 1000,
            cleanup_interval: 100,
            write_attempts: 3,
            retry_backoff_ms: 100,
            busy_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub device_id: String,
    pub user_id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id: "rpi_node_1".into(),
            user_id: "user_001".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub batch_limit: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            batch_limit: 100,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub device: DeviceConfig,
    pub sampling: SamplingConfig,
    pub detector: DetectorSettings,
    pub calibration: CalibrationSettings,
    pub recording: RecordingConfig,
    pub storage: StorageSettings,
    pub identity: IdentityConfig,
    pub sync: SyncConfig,
}

impl MonitorConfig {
    /// Loads from `SLEEPSENSE_CONFIG` (or `sleepsense.json`) plus env overrides.
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// A missing file means defaults; a malformed one is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("SLEEPSENSE_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(device_id) = lookup("SLEEPSENSE_DEVICE_ID") {
            self.identity.device_id = device_id;
        }
        if let Some(user_id) = lookup("SLEEPSENSE_USER_ID") {
            self.identity.user_id = user_id;
        }
        if let Some(mock) = lookup("SLEEPSENSE_MOCK_ADC") {
            self.device.mock = parse_flag(&mock)
                .ok_or_else(|| anyhow!("Invalid SLEEPSENSE_MOCK_ADC: {mock}"))?;
        }
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            retention: chrono::Duration::days(self.storage.retention_days),
            overflow_capacity: self.storage.overflow_capacity,
            cleanup_interval: self.storage.cleanup_interval,
            write_attempts: self.storage.write_attempts,
            retry_backoff: Duration::from_millis(self.storage.retry_backoff_ms),
            device_id: self.identity.device_id.clone(),
            user_id: self.identity.user_id.clone(),
        }
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
        }
    }

    pub fn log_config(&self) {
        info!("Configuration loaded:");
        info!(
            "  device   : {} @ 0x{:02X} ch{} ({:?}, mock={})",
            self.device.i2c_bus,
            self.device.address,
            self.device.channel,
            self.device.gain,
            self.device.mock
        );
        info!(
            "  sampling : {} Hz, variance window {}",
            self.sampling.rate_hz, self.sampling.variance_window
        );
        info!(
            "  storage  : {} (retention {} d, overflow {})",
            self.storage.db_path.display(),
            self.storage.retention_days,
            self.storage.overflow_capacity
        );
        info!(
            "  identity : {} / {}",
            self.identity.device_id, self.identity.user_id
        );
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
