//! Everything the sampling loop needs, built once at startup.

mod loop_worker;
mod sync;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use crate::config::MonitorConfig;
use crate::db::Calibration;
use crate::detector::{DetectorConfig, OccupancyState, SleepDetector};
use crate::recording::{Captured, RecordingController};
use crate::sensor::{
    CalibrationMode, CalibrationOptions, ForceSensor, SensorSample, SyntheticOccupant,
    VoltageSource,
};
use crate::storage::{Storage, StorageStats, WriteOutcome};

pub use loop_worker::sampling_loop;
pub use sync::{sync_pending, SyncReport, Uplink, UplinkFuture};

pub type BoxedSource = Box<dyn VoltageSource + Send>;
pub type SharedSensor = Arc<Mutex<ForceSensor<BoxedSource>>>;

/// Result of one pass through read → classify → record.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub sample: SensorSample,
    pub state: OccupancyState,
    pub outcomes: Vec<WriteOutcome>,
    pub recording: bool,
}

pub struct MonitorContext {
    pub config: MonitorConfig,
    pub storage: Storage,
    pub sensor: SharedSensor,
    pub detector: SleepDetector,
    pub recorder: RecordingController,
    pub uplink: Option<Arc<dyn Uplink>>,
}

pub(crate) fn lock_sensor(sensor: &SharedSensor) -> MutexGuard<'_, ForceSensor<BoxedSource>> {
    match sensor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MonitorContext {
    /// Opens storage and brings the sensor to a calibrated state.
    ///
    /// Only a storage failure is fatal. Without a stored calibration the
    /// sensor is calibrated with `calibration_mode`, or runs on factory
    /// defaults when that is `None`.
    pub async fn new(
        config: MonitorConfig,
        source: BoxedSource,
        calibration_mode: Option<CalibrationMode>,
        uplink: Option<Arc<dyn Uplink>>,
    ) -> Result<Self> {
        let storage = Storage::open(
            config.storage.db_path.clone(),
            config.database_options(),
            config.storage_config(),
        )?;

        let mut sensor = ForceSensor::new(
            source,
            config.sampling.variance_window,
            config.sampling.buffer_capacity,
        );
        if config.device.synthetic {
            sensor = sensor.with_synthetic(SyntheticOccupant::new(Instant::now()));
        }
        let sensor: SharedSensor = Arc::new(Mutex::new(sensor));

        let calibration = match storage.load_calibration().await {
            Ok(Some(calibration)) => {
                lock_sensor(&sensor).load_calibration(&calibration);
                calibration
            }
            Ok(None) => {
                let options = config.calibration.options();
                Self::first_calibration(&storage, &sensor, calibration_mode, options).await
            }
            Err(err) => {
                error!("Failed to load calibration, using defaults: {err:#}");
                Calibration::uncalibrated()
            }
        };

        let detector = SleepDetector::new(
            DetectorConfig::from_calibration(
                &calibration,
                config.detector.empty_margin,
                config.detector.sleep_delay(),
            ),
            Instant::now(),
        );
        let recorder =
            RecordingController::new(config.recording.pre_roll, config.recording.post_roll);

        if uplink.is_none() {
            info!("No uplink configured, readings stay local");
        }

        Ok(Self {
            config,
            storage,
            sensor,
            detector,
            recorder,
            uplink,
        })
    }

    async fn first_calibration(
        storage: &Storage,
        sensor: &SharedSensor,
        mode: Option<CalibrationMode>,
        options: CalibrationOptions,
    ) -> Calibration {
        let Some(mode) = mode else {
            warn!("No calibration stored, using factory defaults");
            return Calibration::uncalibrated();
        };

        let handle = Arc::clone(sensor);
        let result = tokio::task::spawn_blocking(move || {
            lock_sensor(&handle).calibrate(mode, &options)
        })
        .await;

        match result {
            Ok(Ok(calibration)) => {
                if let Err(err) = storage.save_calibration(&calibration).await {
                    error!("Failed to persist calibration: {err:#}");
                }
                calibration
            }
            Ok(Err(err)) => {
                warn!("Calibration failed, using factory defaults: {err}");
                Calibration::uncalibrated()
            }
            Err(err) => {
                error!("Calibration worker join failed: {err}");
                Calibration::uncalibrated()
            }
        }
    }

    pub fn channel(&self) -> u8 {
        lock_sensor(&self.sensor).channel()
    }

    /// One sampling step. Only a lost sensor worker is an error.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let handle = Arc::clone(&self.sensor);
        let sample = tokio::task::spawn_blocking(move || lock_sensor(&handle).sample())
            .await
            .map_err(|err| anyhow!("sensor worker join failed: {err}"))?;

        let state = self.detector.update(sample.voltage, sample.variance, Instant::now());
        let outcomes = self
            .recorder
            .record(
                Captured { sample, state },
                self.detector.movement_threshold(),
                &self.storage,
            )
            .await;

        Ok(TickReport {
            sample,
            state,
            outcomes,
            recording: self.recorder.is_recording(),
        })
    }

    /// Runs one sync round if an uplink is configured.
    pub async fn sync_once(&self) -> Result<Option<SyncReport>> {
        let Some(uplink) = self.uplink.as_deref() else {
            return Ok(None);
        };
        let report = sync_pending(
            &self.storage,
            uplink,
            self.channel(),
            self.config.sync.batch_limit,
        )
        .await?;
        Ok(Some(report))
    }

    /// Best-effort wind-down: flush, prune, final sync, report.
    pub async fn shutdown(self) -> Result<StorageStats> {
        info!("Shutting down monitor");

        match self.storage.flush_overflow().await {
            Ok(0) => {}
            Ok(flushed) => info!("Flushed {flushed} deferred readings on shutdown"),
            Err(err) => error!(
                "Final overflow flush failed, {} readings lost: {err:#}",
                self.storage.overflow_depth().await
            ),
        }

        if let Err(err) = self.storage.cleanup_old_data().await {
            error!("Final retention pass failed: {err:#}");
        }

        if let Err(err) = self.sync_once().await {
            error!("Final sync failed: {err:#}");
        }

        drop(self.sensor);
        info!("Sensor released");

        let stats = self
            .storage
            .get_stats()
            .await
            .context("failed to read final storage stats")?;
        info!(
            "Final stats: {} readings ({} unsynced), {} bytes, overflow {}",
            stats.total_readings, stats.unsynced_readings, stats.storage_bytes, stats.overflow_depth
        );
        Ok(stats)
    }
}
