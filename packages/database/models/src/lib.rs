#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aggregate row types and query parameter definitions.
//!
//! These types represent density aggregates as stored in and retrieved from
//! the `SQLite` store. The HTTP shape lives in `crowd_monitor_server_models`.

use chrono::{DateTime, Utc};
use crowd_monitor_density_models::{DensityState, classify};
use serde::{Deserialize, Serialize};

/// Number of records returned when a query does not specify a limit.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// One persisted density observation for a camera at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Primary key, assigned by the store in insertion order.
    pub id: i64,
    /// District the camera belongs to.
    pub district_id: String,
    /// Camera that produced the observation.
    pub camera_id: String,
    /// When the observation was recorded.
    pub timestamp: DateTime<Utc>,
    /// Number of persons detected.
    pub count: u32,
    /// Tier derived from `count`.
    pub density_state: DensityState,
    /// People per minute, reserved for flow estimation.
    pub flow_rate: Option<f64>,
}

/// Fields for a record about to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAggregate {
    /// District the camera belongs to.
    pub district_id: String,
    /// Camera that produced the observation.
    pub camera_id: String,
    /// Defaults to the time of the write.
    pub timestamp: Option<DateTime<Utc>>,
    /// Persons detected; the tier is derived from it on save.
    pub count: u32,
    /// People per minute, when estimated.
    pub flow_rate: Option<f64>,
}

impl NewAggregate {
    /// Creates an observation stamped at write time.
    #[must_use]
    pub fn new(district_id: impl Into<String>, camera_id: impl Into<String>, count: u32) -> Self {
        Self {
            district_id: district_id.into(),
            camera_id: camera_id.into(),
            timestamp: None,
            count,
            flow_rate: None,
        }
    }

    /// Pins the observation time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches a flow estimate.
    #[must_use]
    pub const fn with_flow_rate(mut self, flow_rate: f64) -> Self {
        self.flow_rate = Some(flow_rate);
        self
    }

    /// The tier that will be stored for this observation.
    #[must_use]
    pub const fn density_state(&self) -> DensityState {
        classify(self.count)
    }
}

/// Parameters for listing aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateQuery {
    /// Restrict to one district (`None` = all districts).
    pub district_id: Option<String>,
    /// Maximum number of results to return.
    pub limit: u32,
}

impl Default for AggregateQuery {
    fn default() -> Self {
        Self {
            district_id: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl AggregateQuery {
    /// Query scoped to one district with the default limit.
    #[must_use]
    pub fn for_district(district_id: impl Into<String>) -> Self {
        Self {
            district_id: Some(district_id.into()),
            ..Self::default()
        }
    }
}
