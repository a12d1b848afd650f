#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Frame processing: person detection and density classification.
//!
//! [`FrameProcessor`] downscales wide frames to at most
//! [`MAX_FRAME_WIDTH`] pixels, hands them to a [`PersonDetector`], and
//! classifies the resulting person count into a [`DensityState`]. The
//! production detector is the `OpenCV` HOG pedestrian detector behind the
//! `opencv` feature.

#[cfg(feature = "opencv")]
pub mod hog;
pub mod resize;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

use crowd_monitor_density_models::{DensityState, classify};
use crowd_monitor_stream::Frame;
use serde::{Deserialize, Serialize};

/// Frames wider than this are downscaled before detection.
pub const MAX_FRAME_WIDTH: u32 = 800;

/// Errors that can occur during detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// No detector is compiled into this build.
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    /// The frame could not be converted for the detector.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Error raised by `OpenCV`.
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Axis-aligned bounding box of one detected person, in the coordinates of
/// the (possibly downscaled) frame the detector saw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Box width.
    pub width: i32,
    /// Box height.
    pub height: i32,
    /// Detector confidence, when the detector reports one.
    pub weight: Option<f64>,
}

/// Outcome of processing a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Number of persons detected (`regions.len()`).
    pub count: u32,
    /// One region per detected person.
    pub regions: Vec<Region>,
    /// Tier derived from `count`.
    pub density_state: DensityState,
}

impl DetectionResult {
    /// Builds a result from detected regions, deriving count and tier.
    #[must_use]
    pub fn from_regions(regions: Vec<Region>) -> Self {
        let count = u32::try_from(regions.len()).unwrap_or(u32::MAX);
        Self {
            count,
            regions,
            density_state: classify(count),
        }
    }

    /// The result for an absent frame: nobody, `LOW`.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_regions(Vec::new())
    }
}

/// A person detector.
///
/// Shared by every camera's processing tick, possibly from several
/// blocking threads at once.
pub trait PersonDetector: Send + Sync {
    /// Detects persons in `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError`] if detection cannot run on this frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>, DetectError>;

    /// Short detector name for logs.
    fn name(&self) -> &'static str;
}

/// Detector used when the binary was built without `OpenCV`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedDetector;

impl PersonDetector for UnsupportedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Region>, DetectError> {
        Err(DetectError::Unavailable(
            "built without a detector (enable the `opencv` feature)".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Returns the detector compiled into this build.
///
/// # Errors
///
/// Returns [`DetectError`] if the detector fails to initialize.
pub fn default_detector() -> Result<Box<dyn PersonDetector>, DetectError> {
    #[cfg(feature = "opencv")]
    {
        Ok(Box::new(hog::HogPeopleDetector::new()?))
    }
    #[cfg(not(feature = "opencv"))]
    {
        Ok(Box::new(UnsupportedDetector))
    }
}

/// Runs detection and classification on frames.
pub struct FrameProcessor {
    detector: Box<dyn PersonDetector>,
    max_width: u32,
}

impl std::fmt::Debug for FrameProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("detector", &self.detector.name())
            .field("max_width", &self.max_width)
            .finish()
    }
}

impl FrameProcessor {
    /// Creates a processor around `detector`.
    #[must_use]
    pub fn new(detector: Box<dyn PersonDetector>) -> Self {
        Self {
            detector,
            max_width: MAX_FRAME_WIDTH,
        }
    }

    /// Processes one frame.
    ///
    /// An absent frame yields zero persons and `LOW`. A malformed frame or
    /// a detector failure is logged and treated the same way.
    #[must_use]
    pub fn process(&self, frame: Option<&Frame>) -> DetectionResult {
        let Some(frame) = frame else {
            return DetectionResult::empty();
        };

        if let Err(e) = frame.validate() {
            log::warn!("Skipping malformed frame: {e}");
            return DetectionResult::empty();
        }

        let scaled = resize::downscale_to_max_width(frame, self.max_width);
        let input = scaled.as_ref().unwrap_or(frame);

        match self.detector.detect(input) {
            Ok(regions) => DetectionResult::from_regions(regions),
            Err(e) => {
                log::warn!("Detection failed with {}: {e}", self.detector.name());
                DetectionResult::empty()
            }
        }
    }

    /// Estimates crowd flow between two frames in people per minute.
    ///
    /// Not implemented yet: always `0.0`, and never used for
    /// classification.
    #[must_use]
    pub const fn estimate_flow(&self, _previous: Option<&Frame>, _current: Option<&Frame>) -> f64 {
        0.0
    }
}
