#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Processing scheduler.
//!
//! Ties ingestion to persistence: every pass visits each active camera in
//! round-robin order, reads one frame, classifies it, and queues one
//! aggregate for the single writer task. Between passes the loop sleeps,
//! and with no active cameras it idles, until the shutdown channel fires.
//!
//! Camera ticks run on Tokio's blocking pool. Each tick takes exclusive
//! ownership of its [`StreamSource`] and hands it back when done, so a
//! capture handle is never touched from two threads at once.

use std::sync::Arc;
use std::time::Duration;

use crowd_monitor_config::{CameraSource, MonitorSettings};
use crowd_monitor_database_models::NewAggregate;
use crowd_monitor_detector::FrameProcessor;
use crowd_monitor_stream::{CaptureBackend, ReconnectPolicy, StreamSource};
use futures::stream::{self, StreamExt as _};
use switchy_database::Database;
use tokio::sync::{mpsc, watch};

/// Records buffered between the camera ticks and the writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors that can end a scheduler run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The persistence writer task panicked or was cancelled.
    #[error("Persistence writer failed: {0}")]
    Writer(String),
}

/// Timing and concurrency knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep after each full pass.
    pub pass_interval: Duration,
    /// Sleep between checks while no camera is active.
    pub idle_interval: Duration,
    /// Camera ticks allowed to run at once within a pass.
    pub workers: usize,
    /// Capacity of the persistence queue.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for SchedulerConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            pass_interval: settings.pass_interval,
            idle_interval: settings.idle_interval,
            workers: settings.workers.max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What happened during one pass over the active cameras.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// Cameras whose tick completed.
    pub visited: usize,
    /// Aggregates handed to the writer.
    pub queued: usize,
    /// Ticks that produced no frame.
    pub skipped_no_frame: usize,
    /// Ticks that panicked; their cameras leave the rotation.
    pub lost: usize,
}

/// Totals for a whole run, returned after shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Completed passes over the active cameras.
    pub passes: u64,
    /// Sleeps taken because no camera was active.
    pub idle_cycles: u64,
    /// Aggregates handed to the writer.
    pub records_queued: u64,
    /// Aggregates the store accepted.
    pub records_written: u64,
    /// Aggregates dropped after a failed save.
    pub records_failed: u64,
}

/// Outcome counters of the persistence writer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Records saved.
    pub written: u64,
    /// Records whose save failed and were skipped.
    pub failed: u64,
}

/// Opens every configured camera and returns the ones that came up.
///
/// Cameras that fail to open are logged and left out for the lifetime of
/// the process.
#[must_use]
pub fn activate_cameras(
    cameras: Vec<CameraSource>,
    backend: &Arc<dyn CaptureBackend>,
    policy: ReconnectPolicy,
) -> Vec<StreamSource> {
    let configured = cameras.len();

    let sources: Vec<StreamSource> = cameras
        .into_iter()
        .filter_map(|camera| {
            let id = camera.id.clone();
            match StreamSource::open(camera, Arc::clone(backend), policy) {
                Ok(source) => {
                    log::info!(
                        "Camera {id} active (district {})",
                        source.camera().district_id
                    );
                    Some(source)
                }
                Err(e) => {
                    log::error!("Skipping camera {id}: {e}");
                    None
                }
            }
        })
        .collect();

    log::info!(
        "{} of {configured} camera(s) active via {} backend",
        sources.len(),
        backend.name()
    );

    sources
}

/// The processing loop.
pub struct Scheduler {
    sources: Vec<StreamSource>,
    processor: Arc<FrameProcessor>,
    db: Arc<dyn Database>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("sources", &self.sources)
            .field("processor", &self.processor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Builds a scheduler over already opened sources.
    #[must_use]
    pub fn new(
        sources: Vec<StreamSource>,
        processor: FrameProcessor,
        db: Arc<dyn Database>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sources,
            processor: Arc::new(processor),
            db,
            config,
        }
    }

    /// Identifiers of the cameras in the rotation, in visiting order.
    #[must_use]
    pub fn active_cameras(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.camera().id.as_str()).collect()
    }

    /// Runs until `shutdown` carries `true` (or its sender is dropped).
    ///
    /// The signal is observed at pass boundaries and during the sleeps
    /// between passes, never in the middle of a tick. On the way out every
    /// stream source is closed and the writer drains the queue before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Writer`] if the persistence writer task
    /// failed.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, SchedulerError> {
        let Self {
            mut sources,
            processor,
            db,
            config,
        } = self;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = tokio::spawn(write_records(db, rx));
        let mut summary = RunSummary::default();

        log::info!(
            "Scheduler started with {} camera(s), {} worker(s)",
            sources.len(),
            config.workers
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = if sources.is_empty() {
                summary.idle_cycles += 1;
                log::warn!(
                    "No active cameras; idling for {}s",
                    config.idle_interval.as_secs_f64()
                );
                config.idle_interval
            } else {
                let (returned, report) =
                    run_pass(sources, &processor, config.workers, &tx).await;
                sources = returned;
                summary.passes += 1;
                summary.records_queued += u64::try_from(report.queued).unwrap_or(u64::MAX);
                log::debug!("Pass {} complete: {report:?}", summary.passes);
                config.pass_interval
            };

            if wait_or_shutdown(&mut shutdown, wait).await {
                break;
            }
        }

        log::info!("Scheduler shutting down; closing {} source(s)", sources.len());
        for source in &mut sources {
            source.close();
        }
        drop(sources);
        drop(tx);

        let stats = writer
            .await
            .map_err(|e| SchedulerError::Writer(e.to_string()))?;
        summary.records_written = stats.written;
        summary.records_failed = stats.failed;

        log::info!(
            "Scheduler stopped after {} pass(es): {} written, {} failed",
            summary.passes,
            summary.records_written,
            summary.records_failed
        );

        Ok(summary)
    }
}

struct TickOutcome {
    source: StreamSource,
    record: Option<NewAggregate>,
}

/// Reads and classifies one frame. Runs on the blocking pool.
fn tick(mut source: StreamSource, processor: &FrameProcessor) -> TickOutcome {
    let Some(frame) = source.read_frame() else {
        return TickOutcome {
            source,
            record: None,
        };
    };

    let result = processor.process(Some(&frame));
    let flow_rate = processor.estimate_flow(None, Some(&frame));
    let camera = source.camera();

    log::debug!(
        "Camera {} ({}): {} person(s), {}",
        camera.id,
        camera.district_id,
        result.count,
        result.density_state
    );

    let record = NewAggregate::new(&camera.district_id, &camera.id, result.count)
        .at(chrono::Utc::now())
        .with_flow_rate(flow_rate);

    TickOutcome {
        source,
        record: Some(record),
    }
}

/// Runs one tick per source and queues the results in source order.
async fn run_pass(
    sources: Vec<StreamSource>,
    processor: &Arc<FrameProcessor>,
    workers: usize,
    tx: &mpsc::Sender<NewAggregate>,
) -> (Vec<StreamSource>, PassReport) {
    let mut returned = Vec::with_capacity(sources.len());
    let mut report = PassReport::default();

    let mut ticks = stream::iter(sources.into_iter().map(|source| {
        let processor = Arc::clone(processor);
        tokio::task::spawn_blocking(move || tick(source, &processor))
    }))
    .buffered(workers.max(1));

    while let Some(joined) = ticks.next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Camera tick failed, removing camera from rotation: {e}");
                report.lost += 1;
                continue;
            }
        };

        report.visited += 1;
        match outcome.record {
            Some(record) => {
                if tx.send(record).await.is_err() {
                    log::error!("Persistence queue closed; dropping record");
                } else {
                    report.queued += 1;
                }
            }
            None => report.skipped_no_frame += 1,
        }
        returned.push(outcome.source);
    }

    (returned, report)
}

/// Sleeps for `wait` unless shutdown is requested first.
///
/// Returns `true` when the loop should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    let sender_gone = tokio::select! {
        () = tokio::time::sleep(wait) => false,
        changed = shutdown.changed() => changed.is_err(),
    };

    sender_gone || *shutdown.borrow()
}

/// Drains the persistence queue, saving each aggregate in arrival order.
///
/// A failed save is logged and skipped; the writer keeps going until every
/// sender is gone.
pub async fn write_records(
    db: Arc<dyn Database>,
    mut rx: mpsc::Receiver<NewAggregate>,
) -> WriteStats {
    let mut stats = WriteStats::default();

    while let Some(aggregate) = rx.recv().await {
        match crowd_monitor_database::save(db.as_ref(), &aggregate).await {
            Ok(record) => {
                stats.written += 1;
                log::trace!("Saved aggregate {} for camera {}", record.id, record.camera_id);
            }
            Err(e) => {
                stats.failed += 1;
                log::error!(
                    "Failed to persist aggregate for camera {}: {e}",
                    aggregate.camera_id
                );
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crowd_monitor_database::{count_records, open_db, query};
    use crowd_monitor_database_models::AggregateQuery;
    use crowd_monitor_density_models::DensityState;
    use crowd_monitor_detector::scripted::{FixedCountDetector, SequenceDetector};
    use crowd_monitor_stream::Frame;
    use crowd_monitor_stream::scripted::{Event, Script, ScriptedBackend};

    use super::*;

    const CLIP: &str = "/samples/a.mp4";
    const DEAD_STREAM: &str = "rtsp://10.0.0.2/cam2";

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir()
            .join("crowd_monitor_scheduler_test")
            .join(format!("{}.db", uuid::Uuid::new_v4()))
    }

    async fn temp_db() -> (Arc<dyn Database>, PathBuf) {
        let path = temp_db_path();
        let db = open_db(&path).await.unwrap();
        (Arc::from(db), path)
    }

    fn camera(id: &str, district: &str, locator: &str, is_file: bool) -> CameraSource {
        CameraSource {
            id: id.to_string(),
            district_id: district.to_string(),
            locator: locator.to_string(),
            is_file,
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            pass_interval: Duration::from_millis(5),
            idle_interval: Duration::from_millis(5),
            workers: 1,
            queue_capacity: 16,
        }
    }

    fn clip_backend(locators: &[&str]) -> ScriptedBackend {
        locators.iter().fold(ScriptedBackend::new(), |backend, locator| {
            backend.with(
                locator,
                Script::File(vec![Frame::black(64, 48), Frame::black(64, 48)]),
            )
        })
    }

    async fn wait_for_records(db: &Arc<dyn Database>, district: Option<&str>, at_least: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while count_records(db.as_ref(), district).await.unwrap() < at_least {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for records");
    }

    #[test]
    fn unreachable_cameras_are_skipped_at_startup() {
        let backend = clip_backend(&[CLIP]);
        let shared: Arc<dyn CaptureBackend> = Arc::new(backend.clone());

        let sources = activate_cameras(
            vec![
                camera("CAM-1", "D1", CLIP, true),
                camera("CAM-2", "D2", DEAD_STREAM, false),
            ],
            &shared,
            ReconnectPolicy::default(),
        );

        let ids: Vec<&str> = sources.iter().map(|s| s.camera().id.as_str()).collect();
        assert_eq!(ids, vec!["CAM-1"]);
        assert_eq!(
            backend.events_for(DEAD_STREAM),
            vec![Event::OpenRefused(DEAD_STREAM.to_string())]
        );
    }

    #[tokio::test]
    async fn round_robin_only_visits_active_cameras() {
        let (db, path) = temp_db().await;
        let backend = clip_backend(&[CLIP]);
        let shared: Arc<dyn CaptureBackend> = Arc::new(backend.clone());

        let sources = activate_cameras(
            vec![
                camera("CAM-1", "D1", CLIP, true),
                camera("CAM-2", "D2", DEAD_STREAM, false),
            ],
            &shared,
            ReconnectPolicy::default(),
        );
        let scheduler = Scheduler::new(
            sources,
            FrameProcessor::new(Box::new(FixedCountDetector::new(0))),
            Arc::clone(&db),
            fast_config(),
        );
        assert_eq!(scheduler.active_cameras(), vec!["CAM-1"]);

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));

        wait_for_records(&db, None, 5).await;
        stop.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();

        let records = query(db.as_ref(), &AggregateQuery::default()).await.unwrap();
        assert!(records.iter().all(|r| r.camera_id == "CAM-1"));
        assert!(records.iter().all(|r| r.district_id == "D1"));
        assert_eq!(summary.records_written, summary.records_queued);

        let mut written: Vec<_> = records.iter().map(|r| (r.id, r.timestamp)).collect();
        written.sort_unstable_by_key(|(id, _)| *id);
        assert!(written.windows(2).all(|pair| pair[0].1 <= pair[1].1));
        assert_eq!(summary.records_failed, 0);

        // The dead camera is never retried.
        assert_eq!(backend.events_for(DEAD_STREAM).len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn black_frames_persist_low_records() {
        let (db, path) = temp_db().await;
        let shared: Arc<dyn CaptureBackend> = Arc::new(clip_backend(&[CLIP]));

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![camera("CAM-1", "D1", CLIP, true)],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(FixedCountDetector::new(0))),
            Arc::clone(&db),
            fast_config(),
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, Some("D1"), 1).await;
        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let record = crowd_monitor_database::latest(db.as_ref(), "D1")
            .await
            .unwrap();
        assert_eq!(record.count, 0);
        assert_eq!(record.density_state, DensityState::Low);
        assert_eq!(record.flow_rate, Some(0.0));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn twenty_people_persist_high_records() {
        let (db, path) = temp_db().await;
        let shared: Arc<dyn CaptureBackend> = Arc::new(clip_backend(&[CLIP]));

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![camera("CAM-1", "D1", CLIP, true)],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(FixedCountDetector::new(20))),
            Arc::clone(&db),
            fast_config(),
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, Some("D1"), 2).await;
        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let records = query(db.as_ref(), &AggregateQuery::for_district("D1"))
            .await
            .unwrap();
        assert!(!records.is_empty());
        for record in records {
            assert_eq!(record.count, 20);
            assert_eq!(record.density_state, DensityState::High);
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn tiers_follow_changing_counts() {
        let (db, path) = temp_db().await;
        let shared: Arc<dyn CaptureBackend> = Arc::new(clip_backend(&[CLIP]));

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![camera("CAM-1", "D1", CLIP, true)],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(SequenceDetector::new(vec![2, 20, 40]))),
            Arc::clone(&db),
            fast_config(),
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, Some("D1"), 3).await;
        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let mut records = query(
            db.as_ref(),
            &AggregateQuery {
                district_id: Some("D1".to_string()),
                limit: 10_000,
            },
        )
        .await
        .unwrap();
        records.sort_unstable_by_key(|r| r.id);

        let first: Vec<(u32, DensityState)> = records
            .iter()
            .take(3)
            .map(|r| (r.count, r.density_state))
            .collect();
        assert_eq!(
            first,
            vec![
                (2, DensityState::Low),
                (20, DensityState::High),
                (40, DensityState::Critical),
            ]
        );
        assert!(
            records
                .iter()
                .skip(3)
                .all(|r| r.density_state == DensityState::Critical)
        );

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn no_cameras_idles_without_writing() {
        let (db, path) = temp_db().await;
        let shared: Arc<dyn CaptureBackend> = Arc::new(ScriptedBackend::new());

        let scheduler = Scheduler::new(
            activate_cameras(Vec::new(), &shared, ReconnectPolicy::default()),
            FrameProcessor::new(Box::new(FixedCountDetector::new(3))),
            Arc::clone(&db),
            fast_config(),
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.passes, 0);
        assert!(summary.idle_cycles >= 1);
        assert_eq!(summary.records_written, 0);
        assert_eq!(count_records(db.as_ref(), None).await.unwrap(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn shutdown_during_long_idle_returns_promptly() {
        let (db, path) = temp_db().await;
        let config = SchedulerConfig {
            idle_interval: Duration::from_secs(3600),
            ..fast_config()
        };
        let scheduler = Scheduler::new(
            Vec::new(),
            FrameProcessor::new(Box::new(FixedCountDetector::new(0))),
            Arc::clone(&db),
            config,
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler ignored shutdown")
            .unwrap()
            .unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn shutdown_closes_every_handle() {
        let (db, path) = temp_db().await;
        let clip_b = "/samples/b.mp4";
        let backend = clip_backend(&[CLIP, clip_b]);
        let shared: Arc<dyn CaptureBackend> = Arc::new(backend.clone());

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![
                    camera("CAM-1", "D1", CLIP, true),
                    camera("CAM-3", "D3", clip_b, true),
                ],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(FixedCountDetector::new(1))),
            Arc::clone(&db),
            fast_config(),
        );
        assert_eq!(backend.open_handles(CLIP), 1);
        assert_eq!(backend.open_handles(clip_b), 1);

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, None, 4).await;
        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();

        for locator in [CLIP, clip_b] {
            assert_eq!(backend.open_handles(locator), 0);
            assert_eq!(backend.max_open_handles(locator), 1);
            assert_eq!(
                backend.events_for(locator).last(),
                Some(&Event::Release(locator.to_string()))
            );
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn parallel_ticks_keep_round_robin_write_order() {
        let (db, path) = temp_db().await;
        let clip_b = "/samples/b.mp4";
        let clip_c = "/samples/c.mp4";
        let shared: Arc<dyn CaptureBackend> = Arc::new(clip_backend(&[CLIP, clip_b, clip_c]));

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![
                    camera("CAM-1", "D1", CLIP, true),
                    camera("CAM-2", "D1", clip_b, true),
                    camera("CAM-3", "D2", clip_c, true),
                ],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(FixedCountDetector::new(6))),
            Arc::clone(&db),
            SchedulerConfig {
                workers: 3,
                ..fast_config()
            },
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, None, 9).await;
        stop.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();

        let mut records = query(
            db.as_ref(),
            &AggregateQuery {
                district_id: None,
                limit: 1000,
            },
        )
        .await
        .unwrap();
        records.sort_by_key(|r| r.id);

        assert_eq!(records.len() as u64, summary.records_written);
        assert_eq!(records.len() % 3, 0);
        for (i, record) in records.iter().enumerate() {
            let expected = ["CAM-1", "CAM-2", "CAM-3"][i % 3];
            assert_eq!(record.camera_id, expected);
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_writes_are_skipped_and_loop_continues() {
        let (db, path) = temp_db().await;
        db.exec_raw(
            "CREATE TRIGGER reject_bad_camera BEFORE INSERT ON aggregates
             WHEN NEW.camera_id = 'CAM-BAD'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .await
        .unwrap();

        let clip_bad = "/samples/bad.mp4";
        let shared: Arc<dyn CaptureBackend> = Arc::new(clip_backend(&[clip_bad, CLIP]));

        let scheduler = Scheduler::new(
            activate_cameras(
                vec![
                    camera("CAM-BAD", "D9", clip_bad, true),
                    camera("CAM-1", "D1", CLIP, true),
                ],
                &shared,
                ReconnectPolicy::default(),
            ),
            FrameProcessor::new(Box::new(FixedCountDetector::new(2))),
            Arc::clone(&db),
            fast_config(),
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown));
        wait_for_records(&db, Some("D1"), 3).await;
        stop.send(true).unwrap();
        let summary = handle.await.unwrap().unwrap();

        assert!(summary.passes >= 3);
        assert!(summary.records_failed >= 3);
        assert_eq!(count_records(db.as_ref(), Some("D9")).await.unwrap(), 0);
        assert_eq!(
            summary.records_written + summary.records_failed,
            summary.records_queued
        );

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn writer_drains_queue_past_failures() {
        let (db, path) = temp_db().await;
        db.exec_raw(
            "CREATE TRIGGER reject_bad_camera BEFORE INSERT ON aggregates
             WHEN NEW.camera_id = 'CAM-BAD'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .await
        .unwrap();

        let (tx, rx) = mpsc::channel(8);
        for camera_id in ["CAM-1", "CAM-BAD", "CAM-2"] {
            tx.send(NewAggregate::new("D1", camera_id, 5)).await.unwrap();
        }
        drop(tx);

        let stats = write_records(Arc::clone(&db), rx).await;
        assert_eq!(stats, WriteStats { written: 2, failed: 1 });

        let cameras: Vec<String> = query(db.as_ref(), &AggregateQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.camera_id)
            .collect();
        assert_eq!(cameras.len(), 2);
        assert!(cameras.contains(&"CAM-1".to_string()));
        assert!(cameras.contains(&"CAM-2".to_string()));

        let _ = std::fs::remove_file(&path);
    }
}
