#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Crowd density tier taxonomy.
//!
//! Every persisted aggregate carries a [`DensityState`] derived from its
//! person count by [`classify`]. The mapping is a pure function of the
//! count, so two aggregates with equal counts always carry equal tiers.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Smallest person count classified as [`DensityState::Moderate`].
pub const MODERATE_MIN_COUNT: u32 = 5;

/// Smallest person count classified as [`DensityState::High`].
pub const HIGH_MIN_COUNT: u32 = 15;

/// Smallest person count classified as [`DensityState::Critical`].
pub const CRITICAL_MIN_COUNT: u32 = 30;

/// Coarse occupancy tier used for public-safety advisories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityState {
    /// 0-4 persons in view
    Low,
    /// 5-14 persons in view
    Moderate,
    /// 15-29 persons in view
    High,
    /// 30 or more persons in view
    Critical,
}

impl DensityState {
    /// Classifies a person count into its density tier.
    ///
    /// Total over all counts: every `u32` maps to exactly one tier.
    #[must_use]
    pub const fn from_count(count: u32) -> Self {
        if count < MODERATE_MIN_COUNT {
            Self::Low
        } else if count < HIGH_MIN_COUNT {
            Self::Moderate
        } else if count < CRITICAL_MIN_COUNT {
            Self::High
        } else {
            Self::Critical
        }
    }
}

/// Classifies a person count into its density tier.
///
/// Shorthand for [`DensityState::from_count`].
#[must_use]
pub const fn classify(count: u32) -> DensityState {
    DensityState::from_count(count)
}
