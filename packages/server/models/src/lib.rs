#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the crowd monitor server.
//!
//! These types are serialized to JSON for the query API. They are separate
//! from the database row types so the API contract can evolve on its own.

use chrono::{DateTime, Utc};
use crowd_monitor_database_models::{AggregateQuery, AggregateRecord, DEFAULT_QUERY_LIMIT};
use crowd_monitor_density_models::DensityState;
use serde::{Deserialize, Serialize};

/// Body of `404` responses for districts without data.
pub const NOT_FOUND_DETAIL: &str = "No data found for this district";

/// A density aggregate as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiAggregate {
    /// Store-assigned identifier, increasing in write order.
    pub id: i64,
    /// District the camera belongs to.
    pub district_id: String,
    /// Camera that produced the observation.
    pub camera_id: String,
    /// Observation time (RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// Persons detected.
    pub count: u32,
    /// Tier derived from `count`.
    pub density_state: DensityState,
    /// People per minute; `null` when not estimated.
    pub flow_rate: Option<f64>,
}

impl From<AggregateRecord> for ApiAggregate {
    fn from(record: AggregateRecord) -> Self {
        Self {
            id: record.id,
            district_id: record.district_id,
            camera_id: record.camera_id,
            timestamp: record.timestamp,
            count: record.count,
            density_state: record.density_state,
            flow_rate: record.flow_rate,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
}

impl ApiHealth {
    /// The only health response the service gives.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Error body carrying a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDetail {
    /// Explanation shown to the client.
    pub detail: String,
}

impl ApiDetail {
    /// Wraps `detail` in the error body.
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Query parameters for `GET /stats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQueryParams {
    /// Restrict to one district.
    pub district_id: Option<String>,
    /// Maximum records to return (default 100). `0` yields an empty list.
    pub limit: Option<u32>,
}

impl StatsQueryParams {
    /// The store query these parameters describe.
    #[must_use]
    pub fn to_query(&self) -> AggregateQuery {
        AggregateQuery {
            district_id: self.district_id.clone().filter(|d| !d.is_empty()),
            limit: self.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
        }
    }
}

/// Query parameters for `GET /stats/latest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LatestQueryParams {
    /// Required; validated by the handler so the error body stays JSON.
    pub district_id: Option<String>,
}
