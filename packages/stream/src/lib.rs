#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Camera stream sources.
//!
//! A [`StreamSource`] owns exactly one capture handle for one configured
//! camera and hides end-of-media and disconnects from its caller: finite
//! files loop forever, live streams are released and reopened after a
//! backoff. The actual capture library sits behind the [`CaptureBackend`]
//! and [`CaptureHandle`] traits so the ingest path can run against `OpenCV`
//! (the `opencv` feature) or an in-memory script.

pub mod frame;
#[cfg(feature = "opencv")]
pub mod opencv_backend;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;
pub mod source;

use std::sync::Arc;

pub use frame::Frame;
pub use source::{ReconnectPolicy, StreamSource};

/// Errors that can occur while opening or reading a stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The capture handle could not be opened.
    #[error("Source unavailable: {locator}: {reason}")]
    SourceUnavailable {
        /// Locator that failed to open.
        locator: String,
        /// Why the open failed.
        reason: String,
    },

    /// A frame could not be read from an open handle.
    #[error("Read failure: {message}")]
    ReadFailure {
        /// Description of what went wrong.
        message: String,
    },

    /// Pixel buffer dimensions do not match its length.
    #[error("Invalid frame: {message}")]
    InvalidFrame {
        /// Description of what went wrong.
        message: String,
    },

    /// Error raised by `OpenCV`.
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// An open capture session on one locator.
///
/// Handles are driven from a single execution context at a time and are
/// never shared, but they move between threads with their owning
/// [`StreamSource`].
pub trait CaptureHandle: Send {
    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` at end of media or when the device produced no
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ReadFailure`] if the underlying device errors.
    fn read(&mut self) -> Result<Option<Frame>, StreamError>;

    /// Seeks back to the first frame of finite media.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the handle cannot seek.
    fn rewind(&mut self) -> Result<(), StreamError>;

    /// Releases the underlying device. Calling it twice is a no-op.
    fn release(&mut self);
}

/// Factory for capture handles.
pub trait CaptureBackend: Send + Sync {
    /// Opens a capture handle on `locator`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SourceUnavailable`] if the handle cannot be
    /// opened.
    fn open(&self, locator: &str) -> Result<Box<dyn CaptureHandle>, StreamError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Backend used when the binary was built without a capture library.
///
/// Refuses every open, so every camera is excluded and the monitor idles.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl CaptureBackend for UnsupportedBackend {
    fn open(&self, locator: &str) -> Result<Box<dyn CaptureHandle>, StreamError> {
        Err(StreamError::SourceUnavailable {
            locator: locator.to_string(),
            reason: "built without a capture backend (enable the `opencv` feature)".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

/// Returns the capture backend compiled into this build.
#[must_use]
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(opencv_backend::OpenCvBackend)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(UnsupportedBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_backend_refuses_every_locator() {
        let backend = UnsupportedBackend;
        for locator in ["data/samples/a.mp4", "rtsp://cam/live"] {
            match backend.open(locator) {
                Err(StreamError::SourceUnavailable { locator: l, .. }) => assert_eq!(l, locator),
                Err(e) => panic!("unexpected error: {e}"),
                Ok(_) => panic!("unsupported backend opened {locator}"),
            }
        }
    }
}
