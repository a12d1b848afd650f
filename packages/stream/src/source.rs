//! Per-camera stream source with loop and reconnect semantics.

use std::sync::Arc;
use std::time::Duration;

use crowd_monitor_config::CameraSource;

use crate::{CaptureBackend, CaptureHandle, Frame, StreamError};

/// Largest doubling step applied to the reconnect backoff.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// Wait applied before reopening a live stream after a read failure.
///
/// The wait starts at `base` and doubles with every consecutive failure
/// up to `max`. With `max == base` the wait is fixed. Reconnects are
/// retried forever either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait after the first failure.
    pub base: Duration,
    /// Upper bound for the wait.
    pub max: Duration,
}

impl ReconnectPolicy {
    /// A fixed wait of `delay` between reconnects.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
        }
    }

    /// Doubling wait from `base` up to `max`.
    #[must_use]
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Wait to apply after `consecutive_failures` failed reads (1-based).
    #[must_use]
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let doublings = consecutive_failures
            .saturating_sub(1)
            .min(MAX_BACKOFF_DOUBLINGS);
        self.base
            .saturating_mul(1 << doublings)
            .min(self.max.max(self.base))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// Owns the single capture handle of one camera.
///
/// At most one handle is open at a time: the previous handle is always
/// released before a replacement is opened.
pub struct StreamSource {
    camera: CameraSource,
    backend: Arc<dyn CaptureBackend>,
    policy: ReconnectPolicy,
    handle: Option<Box<dyn CaptureHandle>>,
    consecutive_failures: u32,
    reconnect_attempts: u64,
    closed: bool,
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("camera", &self.camera)
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("open", &self.handle.is_some())
            .field("consecutive_failures", &self.consecutive_failures)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl StreamSource {
    /// Opens the camera's capture handle.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SourceUnavailable`] if the handle cannot be
    /// opened.
    pub fn open(
        camera: CameraSource,
        backend: Arc<dyn CaptureBackend>,
        policy: ReconnectPolicy,
    ) -> Result<Self, StreamError> {
        let handle = backend
            .open(&camera.locator)
            .map_err(|e| into_unavailable(&camera.locator, e))?;

        log::debug!(
            "Opened {} source {} for camera {}",
            if camera.is_file { "file" } else { "live" },
            camera.locator,
            camera.id
        );

        Ok(Self {
            camera,
            backend,
            policy,
            handle: Some(handle),
            consecutive_failures: 0,
            reconnect_attempts: 0,
            closed: false,
        })
    }

    /// The camera this source serves.
    #[must_use]
    pub const fn camera(&self) -> &CameraSource {
        &self.camera
    }

    /// Failed reads and reopens since the last successful read.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Reopen attempts made over the lifetime of this source.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Whether a capture handle is currently held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the next frame, or `None` if none could be produced this
    /// tick.
    ///
    /// Read failures never escape. A file source rewinds to the start and
    /// retries immediately. A live source releases its handle, waits the
    /// backoff, reopens the same locator, and retries once; if that also
    /// fails, the next call starts over.
    pub fn read_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }

        if let Some(frame) = self.read_current() {
            return Some(frame);
        }

        if self.camera.is_file {
            self.recover_file()
        } else {
            self.recover_live()
        }
    }

    /// Releases the capture handle. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_handle();
        log::debug!("Closed stream for camera {}", self.camera.id);
    }

    fn read_current(&mut self) -> Option<Frame> {
        let handle = self.handle.as_mut()?;

        match handle.read() {
            Ok(Some(frame)) => {
                self.consecutive_failures = 0;
                Some(frame)
            }
            Ok(None) => {
                self.note_failure("end of media");
                None
            }
            Err(e) => {
                self.note_failure(&e.to_string());
                None
            }
        }
    }

    fn recover_file(&mut self) -> Option<Frame> {
        log::info!(
            "End of file reached for {}, looping...",
            self.camera.locator
        );

        match self.handle.as_mut() {
            Some(handle) => {
                if let Err(e) = handle.rewind() {
                    log::warn!("Failed to rewind {}: {e}", self.camera.locator);
                    self.release_handle();
                    self.reopen();
                }
            }
            None => self.reopen(),
        }

        self.read_current()
    }

    fn recover_live(&mut self) -> Option<Frame> {
        log::warn!(
            "Stream {} for camera {} disconnected ({} consecutive failures). Attempting reconnect...",
            self.camera.locator,
            self.camera.id,
            self.consecutive_failures
        );

        self.release_handle();
        std::thread::sleep(self.policy.delay_for(self.consecutive_failures.max(1)));
        self.reopen();

        self.read_current()
    }

    fn reopen(&mut self) {
        debug_assert!(self.handle.is_none(), "reopen while a handle is held");

        self.reconnect_attempts += 1;
        match self.backend.open(&self.camera.locator) {
            Ok(handle) => {
                log::info!(
                    "Reopened {} for camera {}",
                    self.camera.locator,
                    self.camera.id
                );
                self.handle = Some(handle);
            }
            Err(e) => {
                self.note_failure(&e.to_string());
                log::warn!(
                    "Reconnect to {} for camera {} failed: {e}",
                    self.camera.locator,
                    self.camera.id
                );
            }
        }
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }

    fn note_failure(&mut self, reason: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        log::debug!(
            "Read failed for camera {} ({reason}), {} consecutive",
            self.camera.id,
            self.consecutive_failures
        );
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.release_handle();
    }
}

fn into_unavailable(locator: &str, error: StreamError) -> StreamError {
    match error {
        e @ StreamError::SourceUnavailable { .. } => e,
        other => StreamError::SourceUnavailable {
            locator: locator.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Event, Script, ScriptedBackend};

    fn frame(tag: u8) -> Frame {
        Frame::new(vec![tag; 12], 2, 2, 3).unwrap()
    }

    fn camera(locator: &str, is_file: bool) -> CameraSource {
        CameraSource {
            id: "CAM-1".to_string(),
            district_id: "D1".to_string(),
            locator: locator.to_string(),
            is_file,
        }
    }

    fn instant() -> ReconnectPolicy {
        ReconnectPolicy::fixed(Duration::ZERO)
    }

    #[test]
    fn open_fails_for_unreachable_locator() {
        let backend = Arc::new(ScriptedBackend::new().with("rtsp://dead", Script::Unreachable));
        let err = StreamSource::open(camera("rtsp://dead", false), backend, instant()).unwrap_err();
        assert!(matches!(err, StreamError::SourceUnavailable { .. }));
    }

    #[test]
    fn file_source_loops_after_end_of_media() {
        let backend = ScriptedBackend::new().with("a.mp4", Script::File(vec![frame(1), frame(2)]));
        let mut source =
            StreamSource::open(camera("a.mp4", true), Arc::new(backend.clone()), instant())
                .unwrap();

        let tags: Vec<u8> = (0..7)
            .map(|_| source.read_frame().expect("file source never runs dry").data[0])
            .collect();
        assert_eq!(tags, vec![1, 2, 1, 2, 1, 2, 1]);

        assert_eq!(source.consecutive_failures(), 0);
        assert_eq!(source.reconnect_attempts(), 0);
        assert_eq!(
            backend
                .events_for("a.mp4")
                .iter()
                .filter(|e| matches!(e, Event::Rewind(_)))
                .count(),
            3
        );
    }

    #[test]
    fn file_source_never_yields_none_twice_in_a_row() {
        let backend = ScriptedBackend::new().with("a.mp4", Script::File(vec![frame(7)]));
        let mut source =
            StreamSource::open(camera("a.mp4", true), Arc::new(backend), instant()).unwrap();

        for _ in 0..20 {
            assert!(source.read_frame().is_some());
        }
    }

    #[test]
    fn live_source_reopens_once_before_next_read() {
        let backend = ScriptedBackend::new().with(
            "rtsp://cam",
            Script::Live {
                frames: vec![frame(1)],
                refused_reopens: 0,
            },
        );
        let mut source =
            StreamSource::open(camera("rtsp://cam", false), Arc::new(backend.clone()), instant())
                .unwrap();

        assert_eq!(source.read_frame().unwrap().data[0], 1);
        // Session exhausted: read fails, handle is released, reopened, and
        // the retry read hits the fresh session.
        assert_eq!(source.read_frame().unwrap().data[0], 1);

        let events = backend.events_for("rtsp://cam");
        let locator = "rtsp://cam".to_string();
        assert_eq!(
            events,
            vec![
                Event::Open(locator.clone()),
                Event::Read(locator.clone()),
                Event::Read(locator.clone()),
                Event::Release(locator.clone()),
                Event::Open(locator.clone()),
                Event::Read(locator),
            ]
        );
        assert_eq!(backend.max_open_handles("rtsp://cam"), 1);
        assert_eq!(source.reconnect_attempts(), 1);
    }

    #[test]
    fn live_source_keeps_retrying_after_refused_reopens() {
        let backend = ScriptedBackend::new().with(
            "rtsp://flaky",
            Script::Live {
                frames: vec![frame(9)],
                refused_reopens: 2,
            },
        );
        let mut source = StreamSource::open(
            camera("rtsp://flaky", false),
            Arc::new(backend.clone()),
            instant(),
        )
        .unwrap();

        assert!(source.read_frame().is_some());
        // First reconnect refused: no handle held afterwards.
        assert!(source.read_frame().is_none());
        assert!(!source.is_open());
        // Second reconnect refused.
        assert!(source.read_frame().is_none());
        // Third reconnect accepted.
        assert_eq!(source.read_frame().unwrap().data[0], 9);

        assert_eq!(source.reconnect_attempts(), 3);
        assert_eq!(source.consecutive_failures(), 0);
        assert_eq!(backend.max_open_handles("rtsp://flaky"), 1);
    }

    #[test]
    fn failures_accumulate_while_stream_is_down() {
        let backend = ScriptedBackend::new().with(
            "rtsp://down",
            Script::Live {
                frames: vec![],
                refused_reopens: u32::MAX,
            },
        );
        let mut source = StreamSource::open(
            camera("rtsp://down", false),
            Arc::new(backend.clone()),
            instant(),
        )
        .unwrap();

        for _ in 0..3 {
            assert!(source.read_frame().is_none());
        }
        // One failed read plus three refused reopens.
        assert_eq!(source.consecutive_failures(), 4);
        assert_eq!(source.reconnect_attempts(), 3);
        assert_eq!(backend.open_handles("rtsp://down"), 0);
    }

    #[test]
    fn close_is_idempotent_and_releases() {
        let backend = ScriptedBackend::new().with("a.mp4", Script::File(vec![frame(1)]));
        let mut source =
            StreamSource::open(camera("a.mp4", true), Arc::new(backend.clone()), instant())
                .unwrap();

        assert_eq!(backend.open_handles("a.mp4"), 1);
        source.close();
        source.close();
        assert_eq!(backend.open_handles("a.mp4"), 0);
        assert!(source.read_frame().is_none());

        drop(source);
        let releases = backend
            .events_for("a.mp4")
            .iter()
            .filter(|e| matches!(e, Event::Release(_)))
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn drop_releases_handle() {
        let backend = ScriptedBackend::new().with("a.mp4", Script::File(vec![frame(1)]));
        let source =
            StreamSource::open(camera("a.mp4", true), Arc::new(backend.clone()), instant())
                .unwrap();
        drop(source);
        assert_eq!(backend.open_handles("a.mp4"), 0);
    }

    #[test]
    fn fixed_policy_never_escalates() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(1));
        for failures in [1, 2, 10, u32::MAX] {
            assert_eq!(policy.delay_for(failures), Duration::from_secs(1));
        }
    }

    #[test]
    fn exponential_policy_doubles_up_to_cap() {
        let policy = ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }
}
