//! `OpenCV` `VideoCapture` backend.

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use crate::{CaptureBackend, CaptureHandle, Frame, StreamError};

/// Opens files and network streams through `cv::VideoCapture`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvBackend;

impl CaptureBackend for OpenCvBackend {
    fn open(&self, locator: &str) -> Result<Box<dyn CaptureHandle>, StreamError> {
        let unavailable = |reason: String| StreamError::SourceUnavailable {
            locator: locator.to_string(),
            reason,
        };

        let capture = VideoCapture::from_file(locator, videoio::CAP_ANY)
            .map_err(|e| unavailable(e.to_string()))?;

        if !capture.is_opened().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("cannot open video source".to_string()));
        }

        Ok(Box::new(OpenCvHandle {
            capture: Some(capture),
        }))
    }

    fn name(&self) -> &'static str {
        "opencv"
    }
}

struct OpenCvHandle {
    capture: Option<VideoCapture>,
}

impl CaptureHandle for OpenCvHandle {
    fn read(&mut self) -> Result<Option<Frame>, StreamError> {
        let Some(capture) = self.capture.as_mut() else {
            return Err(StreamError::ReadFailure {
                message: "capture already released".to_string(),
            });
        };

        let mut mat = Mat::default();
        if !capture.read(&mut mat)? || mat.empty() {
            return Ok(None);
        }

        mat_to_frame(&mat).map(Some)
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        if let Some(capture) = self.capture.as_mut() {
            capture.set(videoio::CAP_PROP_POS_FRAMES, 0.0)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take()
            && let Err(e) = capture.release()
        {
            log::warn!("Failed to release capture: {e}");
        }
    }
}

impl Drop for OpenCvHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Copies an 8-bit `Mat` into an owned [`Frame`].
///
/// # Errors
///
/// Returns [`StreamError`] if the matrix is not 8-bit or its dimensions
/// are invalid.
pub fn mat_to_frame(mat: &Mat) -> Result<Frame, StreamError> {
    if mat.depth() != opencv::core::CV_8U {
        return Err(StreamError::InvalidFrame {
            message: format!("unsupported matrix depth {}", mat.depth()),
        });
    }

    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    let width = u32::try_from(mat.cols()).map_err(|_| StreamError::InvalidFrame {
        message: format!("negative width {}", mat.cols()),
    })?;
    let height = u32::try_from(mat.rows()).map_err(|_| StreamError::InvalidFrame {
        message: format!("negative height {}", mat.rows()),
    })?;
    let channels = u8::try_from(mat.channels()).map_err(|_| StreamError::InvalidFrame {
        message: format!("unsupported channel count {}", mat.channels()),
    })?;

    Frame::new(data, width, height, channels)
}
