use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};

use crate::db::{
    helpers::{
        column_error, format_timestamp, parse_datetime, parse_optional_datetime, parse_state,
        to_i64, to_u64,
    },
    models::{NewReading, Reading, ReadingCounts},
    Database,
};

const READING_COLUMNS: &str =
    "id, timestamp, voltage, force_percent, state, variance, device_id, user_id, synthetic, synced";

fn row_to_reading(row: &Row) -> Result<Reading, rusqlite::Error> {
    let timestamp_str: String = row.get("timestamp")?;
    let state_str: String = row.get("state")?;

    Ok(Reading {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp_str, "timestamp").map_err(|e| column_error(1, e))?,
        voltage: row.get("voltage")?,
        force_percent: row.get("force_percent")?,
        state: parse_state(&state_str).map_err(|e| column_error(4, e))?,
        variance: row.get("variance")?,
        device_id: row.get("device_id")?,
        user_id: row.get("user_id")?,
        synthetic: row.get("synthetic")?,
        synced: row.get("synced")?,
    })
}

fn insert_with(tx: &Transaction<'_>, reading: &NewReading) -> Result<i64> {
    tx.execute(
        "INSERT INTO readings (
            timestamp,
            voltage,
            force_percent,
            state,
            variance,
            device_id,
            user_id,
            synthetic,
            synced
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            format_timestamp(&reading.timestamp),
            reading.voltage,
            reading.force_percent,
            reading.state.as_str(),
            reading.variance,
            reading.device_id,
            reading.user_id,
            reading.synthetic,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

impl Database {
    pub async fn insert_reading(&self, reading: &NewReading) -> Result<i64> {
        let record = reading.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let id = insert_with(&tx, &record)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    /// Inserts a batch atomically and in order; nothing is written on failure.
    pub async fn insert_readings(&self, readings: Vec<NewReading>) -> Result<Vec<i64>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(readings.len());
            for reading in &readings {
                ids.push(insert_with(&tx, reading)?);
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    /// Oldest-first page of readings still waiting for upstream delivery.
    pub async fn get_unsynced_readings(&self, limit: u64) -> Result<Vec<Reading>> {
        let limit = to_i64(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS}
                 FROM readings
                 WHERE synced = 0
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?1"
            ))?;

            let readings = stmt
                .query_map(params![limit], row_to_reading)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(readings)
        })
        .await
    }

    /// Returns how many rows changed from unsynced to synced.
    pub async fn mark_synced(&self, ids: Vec<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt =
                    tx.prepare("UPDATE readings SET synced = 1 WHERE id = ?1 AND synced = 0")?;
                for id in &ids {
                    changed += stmt.execute(params![id])?;
                }
            }
            tx.commit().context("failed to commit sync marks")?;
            Ok(changed)
        })
        .await
    }

    /// Newest-first readings, optionally restricted to those after `since`.
    pub async fn get_recent_readings(
        &self,
        limit: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>> {
        let limit = to_i64(limit)?;
        let since = since.map(|dt| format_timestamp(&dt));
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {READING_COLUMNS}
                 FROM readings
                 WHERE ?1 IS NULL OR timestamp > ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2"
            ))?;

            let readings = stmt
                .query_map(params![since, limit], row_to_reading)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(readings)
        })
        .await
    }

    pub async fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_timestamp(&cutoff);
        self.execute(move |conn| {
            let deleted = conn
                .execute("DELETE FROM readings WHERE timestamp < ?1", params![cutoff])
                .context("failed to delete expired readings")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn vacuum(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute_batch("VACUUM").context("failed to vacuum database")?;
            Ok(())
        })
        .await
    }

    pub async fn reading_counts(&self) -> Result<ReadingCounts> {
        self.execute(|conn| {
            let (total, unsynced): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(synced = 0), 0) FROM readings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM readings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;

            Ok(ReadingCounts {
                total: to_u64(total, "total")?,
                unsynced: to_u64(unsynced, "unsynced")?,
                size_bytes: to_u64(page_count * page_size, "size_bytes")?,
                oldest: parse_optional_datetime(oldest, "oldest")?,
                newest: parse_optional_datetime(newest, "newest")?,
            })
        })
        .await
    }
}
