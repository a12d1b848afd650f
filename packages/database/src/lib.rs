#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aggregate store.
//!
//! Opens (or creates) the `SQLite` database holding density aggregates and
//! provides the append-only write path plus the read queries served over
//! HTTP. Uses `switchy_database` for all database operations.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use crowd_monitor_database_models::{AggregateQuery, AggregateRecord, NewAggregate};
use crowd_monitor_density_models::DensityState;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use switchy_database_connection::init_sqlite_rusqlite;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during aggregate store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A database query or command failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed (e.g., creating the database directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be converted back into its model type.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// No record matched the request.
    #[error("Not found")]
    NotFound,
}

// ---------------------------------------------------------------------------
// Database lifecycle
// ---------------------------------------------------------------------------

/// Opens (or creates) the aggregate database at the given path and ensures
/// the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the database file cannot be created or the schema
/// DDL fails.
pub async fn open_db(path: &Path) -> Result<Box<dyn Database>, DbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let db = init_sqlite_rusqlite(Some(path)).map_err(|e| DbError::Database(e.to_string()))?;

    ensure_schema(db.as_ref()).await?;

    log::debug!("Opened aggregate store at {}", path.display());

    Ok(db)
}

/// Creates the aggregates table and its indexes if they don't already exist.
///
/// # Errors
///
/// Returns [`DbError::Database`] if any DDL statement fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS aggregates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            district_id TEXT NOT NULL,
            camera_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            count INTEGER NOT NULL CHECK (count >= 0),
            density_state TEXT NOT NULL,
            flow_rate REAL
        )",
    )
    .await
    .map_err(|e| DbError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_district_timestamp
            ON aggregates (district_id, timestamp)",
    )
    .await
    .map_err(|e| DbError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_timestamp
            ON aggregates (timestamp)",
    )
    .await
    .map_err(|e| DbError::Database(e.to_string()))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Formats a timestamp for storage.
///
/// Always microsecond precision with a `Z` suffix, so every stored value has
/// the same width and lexical order matches chronological order.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion(format!("invalid timestamp {value:?}: {e}")))
}

fn opt_f64(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

#[allow(clippy::needless_pass_by_value)]
fn conversion<E: std::fmt::Display>(e: E) -> DbError {
    DbError::Conversion(e.to_string())
}

fn row_to_record(row: &switchy_database::Row) -> Result<AggregateRecord, DbError> {
    let count: i64 = row.to_value("count").map_err(conversion)?;
    let density_state: String = row.to_value("density_state").map_err(conversion)?;
    let timestamp: String = row.to_value("timestamp").map_err(conversion)?;

    Ok(AggregateRecord {
        id: row.to_value("id").map_err(conversion)?,
        district_id: row.to_value("district_id").map_err(conversion)?,
        camera_id: row.to_value("camera_id").map_err(conversion)?,
        timestamp: parse_timestamp(&timestamp)?,
        count: u32::try_from(count)
            .map_err(|_| DbError::Conversion(format!("count out of range: {count}")))?,
        density_state: density_state
            .parse::<DensityState>()
            .map_err(|_| DbError::Conversion(format!("unknown density state {density_state:?}")))?,
        flow_rate: row.to_value("flow_rate").unwrap_or(None),
    })
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Appends one aggregate and returns it as stored.
///
/// The tier is derived from `count` here, so stored records always satisfy
/// the count to tier mapping.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn save(db: &dyn Database, aggregate: &NewAggregate) -> Result<AggregateRecord, DbError> {
    let stored_at = format_timestamp(&aggregate.timestamp.unwrap_or_else(Utc::now));
    let timestamp = parse_timestamp(&stored_at)?;
    let density_state = aggregate.density_state();

    let rows = db
        .query_raw_params(
            "INSERT INTO aggregates (district_id, camera_id, timestamp, count,
                 density_state, flow_rate)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
            &[
                DatabaseValue::String(aggregate.district_id.clone()),
                DatabaseValue::String(aggregate.camera_id.clone()),
                DatabaseValue::String(stored_at),
                DatabaseValue::Int64(i64::from(aggregate.count)),
                DatabaseValue::String(density_state.to_string()),
                opt_f64(aggregate.flow_rate),
            ],
        )
        .await
        .map_err(|e| DbError::Database(e.to_string()))?;

    let id = rows
        .first()
        .and_then(|r| r.to_value::<i64>("id").ok())
        .ok_or_else(|| DbError::Database("insert returned no id".to_string()))?;

    Ok(AggregateRecord {
        id,
        district_id: aggregate.district_id.clone(),
        camera_id: aggregate.camera_id.clone(),
        timestamp,
        count: aggregate.count,
        density_state,
        flow_rate: aggregate.flow_rate,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Lists aggregates newest first, optionally filtered by district.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be converted.
pub async fn query(
    db: &dyn Database,
    params: &AggregateQuery,
) -> Result<Vec<AggregateRecord>, DbError> {
    let mut sql = String::from("SELECT * FROM aggregates");
    let mut values = Vec::new();

    if let Some(district_id) = &params.district_id {
        sql.push_str(" WHERE district_id = ?");
        values.push(DatabaseValue::String(district_id.clone()));
    }

    sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
    values.push(DatabaseValue::Int64(i64::from(params.limit)));

    let rows = db
        .query_raw_params(&sql, &values)
        .await
        .map_err(|e| DbError::Database(e.to_string()))?;

    rows.iter().map(row_to_record).collect()
}

/// Returns the most recent aggregate for a district.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the district has no records, or another
/// [`DbError`] if the query fails.
pub async fn latest(db: &dyn Database, district_id: &str) -> Result<AggregateRecord, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT * FROM aggregates
             WHERE district_id = ?
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
            &[DatabaseValue::String(district_id.to_string())],
        )
        .await
        .map_err(|e| DbError::Database(e.to_string()))?;

    rows.first().map_or(Err(DbError::NotFound), row_to_record)
}

/// Counts stored aggregates, optionally for one district.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_records(db: &dyn Database, district_id: Option<&str>) -> Result<u64, DbError> {
    let rows = match district_id {
        Some(district_id) => {
            db.query_raw_params(
                "SELECT COUNT(*) AS cnt FROM aggregates WHERE district_id = ?",
                &[DatabaseValue::String(district_id.to_string())],
            )
            .await
        }
        None => {
            db.query_raw_params("SELECT COUNT(*) AS cnt FROM aggregates", &[])
                .await
        }
    }
    .map_err(|e| DbError::Database(e.to_string()))?;

    let count: i64 = rows.first().map_or(0, |r| r.to_value("cnt").unwrap_or(0));
    Ok(u64::try_from(count).unwrap_or(0))
}
