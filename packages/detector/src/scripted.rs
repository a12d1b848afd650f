//! Deterministic detectors for exercising the processing pipeline without
//! a vision backend.

use std::sync::atomic::{AtomicUsize, Ordering};

use crowd_monitor_stream::Frame;

use crate::{DetectError, PersonDetector, Region};

/// Reports the same number of persons on every frame.
#[derive(Debug, Clone, Copy)]
pub struct FixedCountDetector {
    count: u32,
}

impl FixedCountDetector {
    /// Detector that always finds `count` persons.
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self { count }
    }
}

impl PersonDetector for FixedCountDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>, DetectError> {
        Ok(synthetic_regions(self.count, frame))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Reports counts from a list in order, repeating the last one once the
/// list is exhausted.
#[derive(Debug)]
pub struct SequenceDetector {
    counts: Vec<u32>,
    cursor: AtomicUsize,
}

impl SequenceDetector {
    /// Detector that walks through `counts`, one per frame.
    #[must_use]
    pub const fn new(counts: Vec<u32>) -> Self {
        Self {
            counts,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl PersonDetector for SequenceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>, DetectError> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let count = self
            .counts
            .get(i)
            .or_else(|| self.counts.last())
            .copied()
            .unwrap_or(0);
        Ok(synthetic_regions(count, frame))
    }

    fn name(&self) -> &'static str {
        "sequence"
    }
}

fn synthetic_regions(count: u32, frame: &Frame) -> Vec<Region> {
    let width = i32::try_from(frame.width.min(64)).unwrap_or(64);
    let height = i32::try_from(frame.height.min(128)).unwrap_or(128);
    (0..count)
        .map(|i| Region {
            x: i32::try_from(i).unwrap_or(i32::MAX),
            y: 0,
            width,
            height,
            weight: Some(1.0),
        })
        .collect()
}
