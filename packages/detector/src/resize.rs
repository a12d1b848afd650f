//! Aspect-preserving downscaling.

use crowd_monitor_stream::Frame;

/// Target dimensions for fitting `width x height` into `max_width`.
///
/// Returns `None` when no scaling is needed. Otherwise the width is exactly
/// `max_width` and the height is `round(height * max_width / width)`, never
/// less than one row.
#[must_use]
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if width <= max_width || max_width == 0 {
        return None;
    }

    let width = u64::from(width);
    let numerator = u64::from(height) * u64::from(max_width);
    let scaled = (numerator + width / 2) / width;

    Some((max_width, u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)))
}

/// Downscales `frame` to `max_width` with nearest-neighbour sampling.
///
/// Returns `None` when the frame is already narrow enough and should be
/// processed as-is, or when its buffer does not match its dimensions.
#[must_use]
pub fn downscale_to_max_width(frame: &Frame, max_width: u32) -> Option<Frame> {
    if frame.validate().is_err() {
        return None;
    }
    let (new_width, new_height) = scaled_dimensions(frame.width, frame.height, max_width)?;

    let channels = usize::from(frame.channels);
    let src_stride = frame.stride();
    let mut data = Vec::with_capacity(new_width as usize * new_height as usize * channels);

    for y in 0..new_height {
        let src_y = source_index(y, new_height, frame.height);
        let row = &frame.data[src_y * src_stride..(src_y + 1) * src_stride];
        for x in 0..new_width {
            let src_x = source_index(x, new_width, frame.width) * channels;
            data.extend_from_slice(&row[src_x..src_x + channels]);
        }
    }

    Some(Frame {
        data,
        width: new_width,
        height: new_height,
        channels: frame.channels,
    })
}

/// Maps a destination index to the source pixel whose center is nearest.
fn source_index(dst: u32, dst_len: u32, src_len: u32) -> usize {
    let idx = (u64::from(dst) * 2 + 1) * u64::from(src_len) / (u64::from(dst_len) * 2);
    usize::try_from(idx.min(u64::from(src_len) - 1)).unwrap_or(usize::MAX)
}
