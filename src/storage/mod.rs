//! Durable, sync-aware store for classified readings.
//!
//! Lock contention is expected (the sampling loop writes while a sync
//! collaborator reads and marks). Writes retry briefly, then divert to a
//! bounded in-memory overflow queue that is replayed, in order, before the
//! next write reaches the database. Replayed rows count toward the periodic
//! retention pass like any other write.

mod overflow;

use std::{
    future::Future,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{is_contention, Calibration, Database, DatabaseOptions, NewReading, Reading};
use crate::detector::OccupancyState;

pub use overflow::{Enqueued, OverflowQueue};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub retention: chrono::Duration,
    pub overflow_capacity: usize,
    /// Retention runs after every this many successful writes.
    pub cleanup_interval: u64,
    pub write_attempts: u32,
    pub retry_backoff: Duration,
    pub device_id: String,
    pub user_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::days(30),
            overflow_capacity: 1000,
            cleanup_interval: 100,
            write_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            device_id: "rpi_node_1".into(),
            user_id: "user_001".into(),
        }
    }
}

/// What happened to a reading handed to [`Storage::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted(i64),
    /// Held in the overflow queue until the store is writable again.
    Deferred,
    /// Overflow queue was full; the reading is lost.
    Dropped,
}

impl WriteOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, WriteOutcome::Persisted(_))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StorageStats {
    pub total_readings: u64,
    pub unsynced_readings: u64,
    pub storage_bytes: u64,
    pub oldest_reading: Option<DateTime<Utc>>,
    pub newest_reading: Option<DateTime<Utc>>,
    pub overflow_depth: usize,
}

struct StorageInner {
    db: Database,
    config: StorageConfig,
    overflow: Mutex<OverflowQueue>,
    writes: AtomicU64,
}

#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Opens (creating if needed) the store. Failure here is fatal to the monitor.
    pub fn open(path: PathBuf, options: DatabaseOptions, config: StorageConfig) -> Result<Self> {
        let db = Database::new(path, options).context("failed to open reading store")?;
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: StorageConfig) -> Self {
        let overflow = OverflowQueue::new(config.overflow_capacity);
        Self {
            inner: Arc::new(StorageInner {
                db,
                config,
                overflow: Mutex::new(overflow),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Stamps a reading with the current time and this node's identity.
    pub fn new_reading(
        &self,
        voltage: f64,
        force_percent: f64,
        state: OccupancyState,
        variance: f64,
        synthetic: bool,
    ) -> NewReading {
        NewReading {
            timestamp: Utc::now(),
            voltage,
            force_percent,
            state,
            variance,
            device_id: self.inner.config.device_id.clone(),
            user_id: self.inner.config.user_id.clone(),
            synthetic,
        }
    }

    pub async fn store_reading(
        &self,
        voltage: f64,
        force_percent: f64,
        state: OccupancyState,
        variance: f64,
        synthetic: bool,
    ) -> WriteOutcome {
        let reading = self.new_reading(voltage, force_percent, state, variance, synthetic);
        self.store(reading).await
    }

    pub async fn store(&self, reading: NewReading) -> WriteOutcome {
        self.store_batch(vec![reading])
            .await
            .into_iter()
            .next()
            .unwrap_or(WriteOutcome::Dropped)
    }

    /// Writes `readings` in one transaction, or defers all of them in order.
    ///
    /// Pending overflow is replayed first so ids stay in arrival order.
    pub async fn store_batch(&self, readings: Vec<NewReading>) -> Vec<WriteOutcome> {
        if readings.is_empty() {
            return Vec::new();
        }

        let mut overflow = self.inner.overflow.lock().await;

        let replayed = match self.flush_locked(&mut overflow).await {
            Ok(n) => n,
            Err(err) => {
                warn!(
                    "Overflow replay failed, deferring {} new readings: {err:#}",
                    readings.len()
                );
                return Self::defer_all(&mut overflow, readings);
            }
        };

        let db = self.inner.db.clone();
        let result = self
            .retrying("insert readings", || {
                let db = db.clone();
                let batch = readings.clone();
                async move { db.insert_readings(batch).await }
            })
            .await;

        let (outcomes, written): (Vec<WriteOutcome>, usize) = match result {
            Ok(ids) => {
                let written = ids.len();
                (ids.into_iter().map(WriteOutcome::Persisted).collect(), written)
            }
            Err(err) => {
                error!("Failed to store {} readings: {err:#}", readings.len());
                (Self::defer_all(&mut overflow, readings), 0)
            }
        };
        drop(overflow);

        let total = (replayed + written) as u64;
        if total > 0 {
            self.count_writes(total).await;
        }
        outcomes
    }

    fn defer_all(overflow: &mut OverflowQueue, readings: Vec<NewReading>) -> Vec<WriteOutcome> {
        readings
            .into_iter()
            .map(|reading| Self::defer(overflow, reading))
            .collect()
    }

    fn defer(overflow: &mut OverflowQueue, reading: NewReading) -> WriteOutcome {
        match overflow.push(reading) {
            Enqueued::Queued { depth } => {
                warn!("Reading held in overflow queue (depth {depth})");
                WriteOutcome::Deferred
            }
            Enqueued::Full => {
                warn!(
                    "Overflow queue full ({} entries), dropping newest reading",
                    overflow.capacity()
                );
                WriteOutcome::Dropped
            }
        }
    }

    /// Replays the overflow queue as one transaction; returns how many were written.
    pub async fn flush_overflow(&self) -> Result<usize> {
        let flushed = {
            let mut overflow = self.inner.overflow.lock().await;
            self.flush_locked(&mut overflow).await?
        };
        if flushed > 0 {
            self.count_writes(flushed as u64).await;
        }
        Ok(flushed)
    }

    async fn flush_locked(&self, overflow: &mut OverflowQueue) -> Result<usize> {
        if overflow.is_empty() {
            return Ok(0);
        }

        let batch = overflow.snapshot();
        let db = self.inner.db.clone();
        let ids = self
            .retrying("flush overflow", || {
                let db = db.clone();
                let batch = batch.clone();
                async move { db.insert_readings(batch).await }
            })
            .await?;

        overflow.clear();
        info!("Flushed {} readings from overflow queue", ids.len());
        Ok(ids.len())
    }

    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.inner.config.write_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_contention(&err) => {
                    let wait = self.inner.config.retry_backoff * attempt;
                    warn!("Database locked during {what}, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn count_writes(&self, n: u64) {
        let interval = self.inner.config.cleanup_interval;
        let before = self.inner.writes.fetch_add(n, Ordering::Relaxed);
        if interval > 0 && before / interval != (before + n) / interval {
            if let Err(err) = self.cleanup_old_data().await {
                error!("Periodic retention pass failed: {err:#}");
            }
        }
    }

    pub async fn get_unsynced_readings(&self, limit: u64) -> Result<Vec<Reading>> {
        self.inner.db.get_unsynced_readings(limit).await
    }

    /// Only call after the upstream side has durably acknowledged `ids`.
    pub async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let changed = self.inner.db.mark_synced(ids.to_vec()).await?;
        log::debug!("Marked {changed} readings as synced");
        Ok(changed)
    }

    pub async fn get_recent_readings(
        &self,
        limit: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>> {
        self.inner.db.get_recent_readings(limit, since).await
    }

    pub async fn save_calibration(&self, calibration: &Calibration) -> Result<()> {
        self.inner.db.save_calibration(calibration).await?;
        info!("Calibration saved");
        Ok(())
    }

    pub async fn load_calibration(&self) -> Result<Option<Calibration>> {
        self.inner.db.load_calibration().await
    }

    /// Deletes readings past the retention window, synced or not.
    pub async fn cleanup_old_data(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.inner.config.retention;
        let deleted = self.inner.db.delete_readings_before(cutoff).await?;

        if deleted > 0 {
            info!(
                "Cleaned up {deleted} readings older than {} days",
                self.inner.config.retention.num_days()
            );
        }
        if let Err(err) = self.inner.db.vacuum().await {
            warn!("Vacuum after retention pass failed: {err:#}");
        }

        Ok(deleted)
    }

    pub async fn overflow_depth(&self) -> usize {
        self.inner.overflow.lock().await.len()
    }

    pub async fn get_stats(&self) -> Result<StorageStats> {
        let counts = self.inner.db.reading_counts().await?;
        Ok(StorageStats {
            total_readings: counts.total,
            unsynced_readings: counts.unsynced,
            storage_bytes: counts.size_bytes,
            oldest_reading: counts.oldest,
            newest_reading: counts.newest,
            overflow_depth: self.overflow_depth().await,
        })
    }
}
