use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{format_timestamp, parse_datetime},
    models::Calibration,
    Database,
};

impl Database {
    /// Upserts the single calibration row (last write wins).
    pub async fn save_calibration(&self, calibration: &Calibration) -> Result<()> {
        let record = calibration.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO calibration
                     (id, baseline_voltage, occupied_threshold, movement_threshold, calibrated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     baseline_voltage = excluded.baseline_voltage,
                     occupied_threshold = excluded.occupied_threshold,
                     movement_threshold = excluded.movement_threshold,
                     calibrated_at = excluded.calibrated_at",
                params![
                    record.baseline_voltage,
                    record.occupied_threshold,
                    record.movement_threshold,
                    format_timestamp(&record.calibrated_at),
                ],
            )
            .with_context(|| "failed to save calibration")?;
            Ok(())
        })
        .await
    }

    pub async fn load_calibration(&self) -> Result<Option<Calibration>> {
        self.execute(|conn| {
            let row = conn
                .query_row(
                    "SELECT baseline_voltage, occupied_threshold, movement_threshold, calibrated_at
                     FROM calibration
                     WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, f64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((baseline_voltage, occupied_threshold, movement_threshold, calibrated_at)) => {
                    Ok(Some(Calibration {
                        baseline_voltage,
                        occupied_threshold,
                        movement_threshold,
                        calibrated_at: parse_datetime(&calibrated_at, "calibrated_at")?,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }
}
