//! `OpenCV` HOG + linear SVM pedestrian detector.

use std::sync::Mutex;

use crowd_monitor_stream::Frame;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::HOGDescriptor;
use opencv::prelude::*;

use crate::{DetectError, PersonDetector, Region};

/// Sliding window step.
const WIN_STRIDE: (i32, i32) = (8, 8);
/// Border added around the image before scanning.
const PADDING: (i32, i32) = (8, 8);
/// Pyramid scale factor between detection passes.
const SCALE: f64 = 1.05;
/// Minimum neighbouring hits to keep a grouped detection.
const GROUP_THRESHOLD: f64 = 2.0;

/// Pedestrian detector using the default people SVM.
///
/// `HOGDescriptor` is not `Sync`, so concurrent ticks serialize on the
/// inner mutex.
pub struct HogPeopleDetector {
    hog: Mutex<HOGDescriptor>,
}

impl std::fmt::Debug for HogPeopleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HogPeopleDetector").finish_non_exhaustive()
    }
}

impl HogPeopleDetector {
    /// Builds a descriptor loaded with `OpenCV`'s default people detector.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::OpenCv`] if the descriptor cannot be created.
    pub fn new() -> Result<Self, DetectError> {
        let mut hog = HOGDescriptor::default()?;
        let svm = HOGDescriptor::get_default_people_detector()?;
        hog.set_svm_detector(&svm)?;
        log::debug!("Initialized HOG people detector");
        Ok(Self {
            hog: Mutex::new(hog),
        })
    }
}

impl PersonDetector for HogPeopleDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>, DetectError> {
        let mat = frame_to_mat(frame)?;

        let mut found = Vector::<Rect>::new();
        let mut weights = Vector::<f64>::new();
        {
            let hog = self
                .hog
                .lock()
                .map_err(|_| DetectError::Unavailable("HOG detector lock poisoned".to_string()))?;
            hog.detect_multi_scale_weights(
                &mat,
                &mut found,
                &mut weights,
                0.0,
                Size::new(WIN_STRIDE.0, WIN_STRIDE.1),
                Size::new(PADDING.0, PADDING.1),
                SCALE,
                GROUP_THRESHOLD,
                false,
            )?;
        }

        Ok(found
            .iter()
            .enumerate()
            .map(|(i, rect)| Region {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                weight: weights.get(i).ok(),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "hog"
    }
}

/// Wraps a frame's pixels in an owned `Mat` of matching shape.
fn frame_to_mat(frame: &Frame) -> Result<Mat, DetectError> {
    let rows = i32::try_from(frame.height)
        .map_err(|_| DetectError::InvalidFrame(format!("height {} too large", frame.height)))?;

    let flat = Mat::from_slice(&frame.data)?;
    let shaped = flat.reshape(i32::from(frame.channels), rows)?;
    Ok(shaped.try_clone()?)
}
