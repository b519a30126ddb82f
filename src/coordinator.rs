//! Coordinator: owns the shared state and runs the collector's units.
//!
//! The coordinator holds the three shared resources (activity cell,
//! observation slot, shutdown signal) and hands each to its single writer:
//! the cell to the task controller, the slot to the observation feed. The
//! recorder and any preview surface get read handles only.
//!
//! Three units run as tokio tasks:
//!
//! - **controller**: the task drive loop, stopped by the process-wide signal
//! - **feed**: polls camera + robot into the slot
//! - **recorder**: persists observations into per-episode sessions
//!
//! On a normal end of run the feed and recorder keep going until the
//! controller has returned, so anything the controller queued up to its last
//! hook is still written. Only then are they stopped and joined, and the
//! recorder flushes its open session.
//!
//! The process-wide shutdown signal stops the feed and recorder directly,
//! within one tick, even while a hook is still running: the recorder applies
//! what is queued, finalizes its session and stops writing.

use crate::activity::{ActivityCell, ActivityReader, ActivitySnapshot};
use crate::config::Settings;
use crate::controller::{RunSummary, Task, TaskContext, TaskController};
use crate::error::{AppResult, DaqError};
use crate::feed::ObservationFeed;
use crate::hardware::{CameraSource, RobotDriver};
use crate::observation::{Observation, ObservationReader, ObservationSlot};
use crate::recorder::{Recorder, RecorderLink, RecorderReport};
use crate::session::SessionAllocator;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use uuid::Uuid;

/// Read-only query surface plus the shutdown trigger.
///
/// Cheap to clone; safe to use from any task while the coordinator runs.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    activity: ActivityReader,
    observations: ObservationReader,
    shutdown: ShutdownSignal,
}

impl CoordinatorHandle {
    /// Current activity snapshot. Never blocks the controller.
    pub fn activity(&self) -> ActivitySnapshot {
        self.activity.snapshot()
    }

    /// Latest observation, if the feed has published one.
    pub fn latest_observation(&self) -> Option<Arc<Observation>> {
        self.observations.latest()
    }

    /// A reader that can await activity transitions.
    pub fn subscribe_activity(&self) -> ActivityReader {
        self.activity.clone()
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Whether shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_set()
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier stamped on every session of the run
    pub run_id: Uuid,
    /// How the controller loop ended
    pub summary: RunSummary,
    /// What the recorder wrote
    pub recorder: RecorderReport,
    /// Observations published by the feed
    pub observations: u64,
}

/// Owns the shared state of a run and spawns its units.
pub struct Coordinator {
    settings: Arc<Settings>,
    activity: ActivityCell,
    slot: ObservationSlot,
    shutdown: ShutdownSignal,
    allocator: SessionAllocator,
    run_id: Uuid,
}

impl Coordinator {
    /// Validate `settings` and set up the shared state.
    pub fn new(settings: Settings) -> AppResult<Self> {
        settings.validate()?;
        let allocator = SessionAllocator::new(settings.experiment_dir());
        Ok(Self {
            settings: Arc::new(settings),
            activity: ActivityCell::new(),
            slot: ObservationSlot::new(),
            shutdown: ShutdownSignal::new(),
            allocator,
            run_id: Uuid::new_v4(),
        })
    }

    /// Use an externally owned shutdown signal (e.g. one wired to Ctrl-C).
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle for watching and stopping the run from outside.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            activity: self.activity.reader(),
            observations: self.slot.reader(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Validated configuration.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run `task` until it finishes, fails fatally, or shutdown is requested.
    ///
    /// Returns the first fatal error. Contained errors never surface here.
    pub async fn run(
        self,
        task: Box<dyn Task>,
        driver: Arc<dyn RobotDriver>,
        camera: Arc<dyn CameraSource>,
    ) -> AppResult<RunReport> {
        let Self {
            settings,
            activity,
            slot,
            shutdown,
            allocator,
            run_id,
        } = self;

        tracing::info!(
            run_id = %run_id,
            task = task.name(),
            output = %allocator.experiment_dir().display(),
            "Starting collection"
        );

        let units_stop = ShutdownSignal::new();
        let (link, inbox) = RecorderLink::channel();
        let observations = slot.reader();

        let mut feed = ObservationFeed::new(slot, camera, Arc::clone(&driver), settings.tick_period());
        // Prime the slot so the first episode never starts on an empty one.
        if !feed.poll().await {
            tracing::warn!("Initial observation unavailable; captures are skipped until the feed recovers");
        }

        let recorder = Recorder::new(
            Arc::clone(&settings),
            activity.reader(),
            observations.clone(),
            inbox,
            allocator,
            run_id,
        );
        let ctx = TaskContext::new(
            Arc::clone(&settings),
            driver,
            activity,
            observations,
            link,
            shutdown.clone(),
        );
        let controller = TaskController::new(task, ctx);

        let feed_task = tokio::spawn(feed.run(units_stop.clone(), shutdown.clone()));
        let recorder_task = tokio::spawn(recorder.run(units_stop.clone(), shutdown.clone()));
        let controller_result = match tokio::spawn(controller.run()).await {
            Ok(result) => result,
            Err(e) => Err(DaqError::Join(format!("task controller: {}", e))),
        };

        tracing::debug!("Task controller returned; stopping recorder and feed");
        units_stop.trigger();

        let mut errors = Vec::new();
        let recorder = match recorder_task.await {
            Ok(report) => report,
            Err(e) => {
                errors.push(DaqError::Join(format!("recorder: {}", e)));
                RecorderReport::default()
            }
        };
        let observations = match feed_task.await {
            Ok(published) => published,
            Err(e) => {
                errors.push(DaqError::Join(format!("observation feed: {}", e)));
                0
            }
        };

        let summary = controller_result?;
        if !errors.is_empty() {
            return Err(DaqError::ShutdownFailed(errors));
        }

        tracing::info!(
            episodes = summary.episodes,
            failures = summary.failures,
            reset_failures = summary.reset_failures,
            sessions = recorder.sessions.len(),
            frames = recorder.frames,
            "Collection finished"
        );
        Ok(RunReport {
            run_id,
            summary,
            recorder,
            observations,
        })
    }
}
