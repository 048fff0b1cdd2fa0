use std::{future::Future, pin::Pin};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::storage::Storage;
use crate::wire::WireReading;

pub type UplinkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Upstream transport for stored readings.
///
/// `publish` must only resolve to `Ok` once the remote side has durably
/// accepted the whole batch; anything else leaves the batch unsynced so it is
/// offered again next round.
pub trait Uplink: Send + Sync {
    fn name(&self) -> &str;
    fn publish<'a>(&'a self, batch: &'a [WireReading]) -> UplinkFuture<'a>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub offered: usize,
    pub marked: usize,
}

/// Pushes one oldest-first batch of unsynced readings and marks it on success.
pub async fn sync_pending(
    storage: &Storage,
    uplink: &dyn Uplink,
    channel: u8,
    limit: u64,
) -> Result<SyncReport> {
    let pending = storage
        .get_unsynced_readings(limit)
        .await
        .context("failed to load unsynced readings")?;
    if pending.is_empty() {
        debug!("Nothing to sync");
        return Ok(SyncReport::default());
    }

    let batch: Vec<WireReading> = pending
        .iter()
        .map(|reading| WireReading::from_reading(reading, channel))
        .collect();

    if let Err(err) = uplink.publish(&batch).await {
        warn!(
            "Uplink {} rejected {} readings, will retry: {err:#}",
            uplink.name(),
            batch.len()
        );
        return Ok(SyncReport {
            offered: batch.len(),
            marked: 0,
        });
    }

    let ids: Vec<i64> = pending.iter().map(|reading| reading.id).collect();
    let marked = storage
        .mark_synced(&ids)
        .await
        .context("failed to mark readings as synced")?;
    info!("Synced {marked} readings via {}", uplink.name());

    Ok(SyncReport {
        offered: batch.len(),
        marked,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::test_support::temp_db_path;
    use crate::db::DatabaseOptions;
    use crate::detector::OccupancyState;
    use crate::storage::StorageConfig;

    #[derive(Default)]
    struct RecordingUplink {
        reject: AtomicBool,
        received: Mutex<Vec<WireReading>>,
    }

    impl Uplink for RecordingUplink {
        fn name(&self) -> &str {
            "test"
        }

        fn publish<'a>(&'a self, batch: &'a [WireReading]) -> UplinkFuture<'a> {
            Box::pin(async move {
                if self.reject.load(Ordering::SeqCst) {
                    return Err(anyhow!("remote unavailable"));
                }
                self.received.lock().unwrap().extend_from_slice(batch);
                Ok(())
            })
        }
    }

    async fn storage_with(voltages: &[f64], synthetic: bool) -> Storage {
        let storage = Storage::open(
            temp_db_path(),
            DatabaseOptions::default(),
            StorageConfig::default(),
        )
        .unwrap();
        for &v in voltages {
            storage
                .store_reading(v, 10.0, OccupancyState::Asleep, 0.0, synthetic)
                .await;
        }
        storage
    }

    #[tokio::test]
    async fn acknowledged_batches_are_marked_in_order() {
        let storage = storage_with(&[1.0, 2.0, 3.0], false).await;
        let uplink = RecordingUplink::default();

        let first = sync_pending(&storage, &uplink, 0, 2).await.unwrap();
        assert_eq!(first, SyncReport { offered: 2, marked: 2 });
        let second = sync_pending(&storage, &uplink, 0, 2).await.unwrap();
        assert_eq!(second, SyncReport { offered: 1, marked: 1 });
        let third = sync_pending(&storage, &uplink, 0, 2).await.unwrap();
        assert_eq!(third, SyncReport::default());

        let received = uplink.received.lock().unwrap();
        assert_eq!(
            received.iter().map(|w| w.voltage).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
        assert!(received.iter().all(|w| w.sensor_type == "fsr408" && !w.simulated));
    }

    #[tokio::test]
    async fn rejected_batch_stays_unsynced() {
        let storage = storage_with(&[1.0, 2.0], true).await;
        let uplink = RecordingUplink::default();
        uplink.reject.store(true, Ordering::SeqCst);

        let report = sync_pending(&storage, &uplink, 0, 10).await.unwrap();
        assert_eq!(report, SyncReport { offered: 2, marked: 0 });
        assert_eq!(storage.get_stats().await.unwrap().unsynced_readings, 2);

        uplink.reject.store(false, Ordering::SeqCst);
        sync_pending(&storage, &uplink, 0, 10).await.unwrap();
        assert_eq!(storage.get_stats().await.unwrap().unsynced_readings, 0);
        assert!(uplink.received.lock().unwrap().iter().all(|w| w.simulated));
    }
}
