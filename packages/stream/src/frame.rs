//! In-memory video frames.

use crate::StreamError;

/// A decoded frame: tightly packed, row-major, interleaved pixels.
///
/// Frames are transient. They are classified and dropped within the same
/// processing tick and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel bytes, `width * height * channels` long.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Interleaved channels per pixel (3 for BGR, 1 for grayscale).
    pub channels: u8,
}

impl Frame {
    /// Creates a frame, checking that the buffer matches the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidFrame`] if any dimension is zero or
    /// `data.len() != width * height * channels`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, StreamError> {
        let frame = Self {
            data,
            width,
            height,
            channels,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Checks that the dimensions are non-zero and match the buffer.
    ///
    /// The fields are public, so a frame built by hand may not hold.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidFrame`] describing the mismatch.
    pub fn validate(&self) -> Result<(), StreamError> {
        let (width, height, channels) = (self.width, self.height, self.channels);
        if width == 0 || height == 0 || channels == 0 {
            return Err(StreamError::InvalidFrame {
                message: format!("zero dimension in {width}x{height}x{channels}"),
            });
        }

        let expected = Self::buffer_len(width, height, channels);
        if self.data.len() != expected {
            return Err(StreamError::InvalidFrame {
                message: format!(
                    "{width}x{height}x{channels} needs {expected} bytes, got {}",
                    self.data.len()
                ),
            });
        }

        Ok(())
    }

    /// An all-black three-channel frame.
    #[must_use]
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; Self::buffer_len(width, height, 3)],
            width,
            height,
            channels: 3,
        }
    }

    /// Bytes per row.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.width as usize * usize::from(self.channels)
    }

    /// Returns the channel values of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the frame.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let channels = usize::from(self.channels);
        let start = y as usize * self.stride() + x as usize * channels;
        &self.data[start..start + channels]
    }

    fn buffer_len(width: u32, height: u32, channels: u8) -> usize {
        width as usize * height as usize * usize::from(channels)
    }
}
