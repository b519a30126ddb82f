//! The recorder: a fixed-rate loop that turns observations into per-episode output.
//!
//! The recorder never waits on the task controller. Each tick it
//!
//! 1. reads the activity snapshot,
//! 2. drains the [`RecorderMessage`]s queued by the controller (captures, order
//!    records, episode outcomes, reset failures), opening the session of each
//!    message's episode,
//! 3. follows the snapshot: a newer episode rotates to a new session, a terminal
//!    state closes the open one,
//! 4. in timer mode, persists the current observation unless paused between
//!    episodes.
//!
//! The snapshot is read before the drain. Everything the controller queued
//! before its latest transition is therefore applied before the recorder acts on
//! that transition, and a session is always finalized before the next one opens.
//!
//! A session holds two phases, `task/` (STARTUP and ACTIVE) and `restore/`
//! (RESETTING). Output of each phase is segmented into units: a unit is one clip
//! per camera view (or one image sequence per view). A new unit starts with
//! every phase change and, for video, whenever `camera.clip_length` frames have
//! been written or a frame no longer matches the shape of its clip. Both frames
//! of an observation are checked before either is written, so the top and
//! bottom clips of a unit always hold the same frames.

pub mod messages;
pub mod telemetry;
pub mod writer;

pub use messages::{CaptureRequest, EpisodeOutcome, RecorderLink, RecorderMessage};
pub use telemetry::{read_json_lines, JsonLinesWriter, TelemetryRecord};
pub use writer::{read_clip, ClipWriter, FrameRecord, ImageSequenceWriter, RawClipWriter};

use crate::activity::{ActivityReader, RobotActivity};
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::observation::{CameraView, Observation, ObservationReader};
use crate::orders::{Order, OrderRecord};
use crate::session::{RecordingPhase, SessionAllocator, SessionLayout, SessionMetadata};
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// A finalized output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSummary {
    /// Session the unit belongs to
    pub session_id: u64,
    /// Episode number
    pub episode: u64,
    /// `task/` or `restore/`
    pub phase: RecordingPhase,
    /// Clip index within the phase
    pub clip: u32,
    /// Frames per camera view
    pub frames: u64,
    /// Files of both views
    pub files: Vec<PathBuf>,
}

/// What the recorder produced over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecorderReport {
    /// Finalized units in the order they were closed
    pub units: Vec<UnitSummary>,
    /// Every session directory opened
    pub sessions: Vec<PathBuf>,
    /// Observations persisted
    pub frames: u64,
    /// Ticks run
    pub ticks: u64,
    /// Ticks or captures dropped on a capture error
    pub skipped: u64,
    /// Timer ticks not sampled during the pause between episodes
    pub paused: u64,
}

/// Output of one phase of a session.
struct PhaseOutput {
    phase: RecordingPhase,
    layout: SessionLayout,
    images: bool,
    telemetry: JsonLinesWriter<TelemetryRecord>,
    top: Box<dyn ClipWriter>,
    bottom: Box<dyn ClipWriter>,
    clip: u32,
    frames: u64,
}

impl PhaseOutput {
    fn new(layout: &SessionLayout, phase: RecordingPhase, images: bool) -> Self {
        let (top, bottom) = Self::writers(layout, phase, images, 0);
        Self {
            phase,
            layout: layout.clone(),
            images,
            telemetry: JsonLinesWriter::new(layout.telemetry_path(phase)),
            top,
            bottom,
            clip: 0,
            frames: 0,
        }
    }

    fn writers(
        layout: &SessionLayout,
        phase: RecordingPhase,
        images: bool,
        clip: u32,
    ) -> (Box<dyn ClipWriter>, Box<dyn ClipWriter>) {
        let make = |view: CameraView| -> Box<dyn ClipWriter> {
            if images {
                Box::new(ImageSequenceWriter::new(layout.images_dir(phase, view), view))
            } else {
                Box::new(RawClipWriter::new(
                    layout.video_dir(phase, view).join(format!("clip_{}.frames", clip)),
                ))
            }
        };
        (make(CameraView::Top), make(CameraView::Bottom))
    }

    /// Close the current unit and start the next one.
    fn finish_unit(&mut self, episode: u64, finalized: &mut Vec<UnitSummary>) -> AppResult<()> {
        let top = self.top.finish()?;
        let bottom = self.bottom.finish()?;
        if top.frames > 0 || bottom.frames > 0 {
            let mut files = top.paths;
            files.extend(bottom.paths);
            finalized.push(UnitSummary {
                session_id: self.layout.id,
                episode,
                phase: self.phase,
                clip: self.clip,
                frames: top.frames.min(bottom.frames),
                files,
            });
            self.clip += 1;
        }
        let (top, bottom) = Self::writers(&self.layout, self.phase, self.images, self.clip);
        self.top = top;
        self.bottom = bottom;
        Ok(())
    }

    fn close(&mut self, episode: u64, finalized: &mut Vec<UnitSummary>, errors: &mut Vec<DaqError>) {
        if let Err(e) = self.finish_unit(episode, finalized) {
            errors.push(e);
        }
        if let Err(e) = self.telemetry.close() {
            errors.push(e);
        }
    }
}

/// Output state of the session currently being recorded.
struct Segment {
    layout: SessionLayout,
    metadata: SessionMetadata,
    clip_length: Option<u32>,
    orders: JsonLinesWriter<OrderRecord>,
    task: PhaseOutput,
    restore: PhaseOutput,
    current: RecordingPhase,
}

impl Segment {
    fn open(layout: SessionLayout, metadata: SessionMetadata, settings: &Settings) -> AppResult<Self> {
        metadata.write_to(&layout)?;
        let images = settings.camera.save_images_individually;
        Ok(Self {
            orders: JsonLinesWriter::new(layout.orders_path()),
            task: PhaseOutput::new(&layout, RecordingPhase::Task, images),
            restore: PhaseOutput::new(&layout, RecordingPhase::Restore, images),
            current: RecordingPhase::Task,
            layout,
            metadata,
            clip_length: if images { None } else { settings.camera.clip_length },
        })
    }

    fn episode(&self) -> u64 {
        self.metadata.episode
    }

    fn frames(&self) -> u64 {
        self.task.frames + self.restore.frames
    }

    fn output(&mut self, phase: RecordingPhase) -> &mut PhaseOutput {
        match phase {
            RecordingPhase::Task => &mut self.task,
            RecordingPhase::Restore => &mut self.restore,
        }
    }

    fn enter(&mut self, phase: RecordingPhase, finalized: &mut Vec<UnitSummary>) -> AppResult<()> {
        if phase == self.current {
            return Ok(());
        }
        let episode = self.episode();
        let previous = self.output(self.current);
        previous.finish_unit(episode, finalized)?;
        previous.telemetry.close()?;
        tracing::info!(
            session = self.layout.id,
            episode,
            "Recording into {}/",
            phase.as_str()
        );
        self.current = phase;
        Ok(())
    }

    fn write(
        &mut self,
        activity: RobotActivity,
        order: Option<Order>,
        observation: &Observation,
        finalized: &mut Vec<UnitSummary>,
    ) -> AppResult<()> {
        let (top, bottom) = match (&observation.top, &observation.bottom) {
            (Some(top), Some(bottom)) if observation.has_frames() => (top, bottom),
            _ => {
                return Err(DaqError::Capture(format!(
                    "observation {} is missing a well-formed frame",
                    observation.sequence
                )))
            }
        };

        let phase = RecordingPhase::of(activity);
        self.enter(phase, finalized)?;
        let episode = self.episode();
        let clip_length = self.clip_length;
        let output = self.output(phase);

        let full = clip_length.is_some_and(|limit| output.top.frames() >= u64::from(limit));
        let reshaped = !output.top.fits(top) || !output.bottom.fits(bottom);
        if full || reshaped {
            output.finish_unit(episode, finalized)?;
            if reshaped {
                tracing::warn!(
                    session = output.layout.id,
                    clip = output.clip,
                    "Frame shape changed, starting a new clip"
                );
            } else {
                tracing::debug!(session = output.layout.id, clip = output.clip, "Clip rollover");
            }
        }

        output.top.write_frame(output.frames, observation.timestamp, top)?;
        output.bottom.write_frame(output.frames, observation.timestamp, bottom)?;
        output.telemetry.append(&TelemetryRecord {
            index: output.frames,
            timestamp: observation.timestamp,
            recorded_at: Utc::now(),
            episode,
            phase,
            activity,
            order,
            telemetry: observation.telemetry,
            clip: output.clip,
            observation: observation.sequence,
        })?;
        output.frames += 1;
        Ok(())
    }

    fn mark_reset_failed(&mut self) -> AppResult<()> {
        self.metadata.reset_failed = true;
        self.metadata.write_to(&self.layout)
    }

    fn close(mut self, finalized: &mut Vec<UnitSummary>) -> AppResult<()> {
        let mut errors = Vec::new();
        let episode = self.episode();
        self.task.close(episode, finalized, &mut errors);
        self.restore.close(episode, finalized, &mut errors);
        if let Err(e) = self.orders.close() {
            errors.push(e);
        }

        self.metadata.finished_at = Some(Utc::now());
        self.metadata.frames = self.frames();
        if let Err(e) = self.metadata.write_to(&self.layout) {
            errors.push(e);
        }

        tracing::info!(
            session = self.layout.id,
            episode,
            task_frames = self.task.frames,
            restore_frames = self.restore.frames,
            "Session closed"
        );
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(DaqError::ShutdownFailed(errors)),
        }
    }
}

/// Fixed-rate recorder. Build with [`Recorder::new`], drive with [`Recorder::run`].
pub struct Recorder {
    settings: Arc<Settings>,
    activity: ActivityReader,
    observations: ObservationReader,
    inbox: mpsc::UnboundedReceiver<RecorderMessage>,
    allocator: SessionAllocator,
    run_id: Uuid,
    segment: Option<Segment>,
    /// Highest episode a session was opened for
    last_episode: u64,
    /// End of the pause between episodes
    paused_until: Option<Instant>,
    report: RecorderReport,
    stopped: bool,
}

impl Recorder {
    /// Recorder reading `activity` and `observations`, fed through `inbox`.
    pub fn new(
        settings: Arc<Settings>,
        activity: ActivityReader,
        observations: ObservationReader,
        inbox: mpsc::UnboundedReceiver<RecorderMessage>,
        allocator: SessionAllocator,
        run_id: Uuid,
    ) -> Self {
        Self {
            settings,
            activity,
            observations,
            inbox,
            allocator,
            run_id,
            segment: None,
            last_episode: 0,
            paused_until: None,
            report: RecorderReport::default(),
            stopped: false,
        }
    }

    /// Directory of the open session, if any.
    pub fn current_session(&self) -> Option<&SessionLayout> {
        self.segment.as_ref().map(|s| &s.layout)
    }

    /// Report so far.
    pub fn report(&self) -> &RecorderReport {
        &self.report
    }

    /// Tick at `camera.fps` until either signal fires, then flush everything.
    ///
    /// `stop` ends a run normally, once the controller has returned. `shutdown`
    /// is the process-wide signal: on it the recorder stops ticking at once,
    /// applies what is already queued and finalizes the open session.
    pub async fn run(mut self, stop: ShutdownSignal, shutdown: ShutdownSignal) -> RecorderReport {
        let mut interval = tokio::time::interval(self.settings.tick_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            fps = self.settings.camera.fps,
            record = self.settings.camera.record,
            record_only_after_action = self.settings.camera.record_only_after_action,
            "Recorder started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown: finalizing the open session");
                    break;
                }
                _ = stop.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }
        self.stop()
    }

    /// One polling step. Errors are contained here and logged.
    pub fn tick(&mut self) {
        if self.stopped {
            return;
        }
        self.report.ticks += 1;

        if !self.settings.camera.record {
            while self.inbox.try_recv().is_ok() {}
            return;
        }

        let snapshot = self.activity.snapshot();
        self.drain();

        if !snapshot.state.is_terminal() && snapshot.episode > self.last_episode {
            self.ensure_segment(snapshot.episode);
        }
        if snapshot.state.is_terminal() {
            self.close_segment();
            return;
        }

        if self.settings.camera.record_only_after_action {
            return;
        }
        match self.segment.as_ref().map(Segment::episode) {
            Some(episode) if episode == snapshot.episode => {}
            _ => return,
        }
        if self.is_paused() {
            self.report.paused += 1;
            return;
        }
        let result = match self.observations.latest() {
            Some(observation) => self.persist(snapshot.state, None, &observation),
            None => Err(DaqError::Capture("no observation available yet".to_string())),
        };
        if let Err(e) = result {
            self.report.skipped += 1;
            tracing::warn!(episode = snapshot.episode, "Skipped tick: {}", e);
        }
    }

    /// Flush and close all output. Safe to call any number of times.
    pub fn stop(&mut self) -> RecorderReport {
        if !self.stopped {
            if self.settings.camera.record {
                self.drain();
            }
            self.close_segment();
            self.inbox.close();
            self.stopped = true;
            tracing::info!(
                units = self.report.units.len(),
                frames = self.report.frames,
                skipped = self.report.skipped,
                paused = self.report.paused,
                "Recorder stopped"
            );
        }
        self.report.clone()
    }

    fn is_paused(&mut self) -> bool {
        match self.paused_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.paused_until = None;
                tracing::debug!(episode = self.last_episode, "Pause between episodes over");
                false
            }
            None => false,
        }
    }

    fn drain(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            let episode = message.episode();
            if !self.ensure_segment(episode) {
                tracing::warn!(episode, "Dropping message for a closed episode");
                continue;
            }
            if let Err(e) = self.apply(message) {
                if matches!(e, DaqError::Capture(_)) {
                    self.report.skipped += 1;
                }
                tracing::warn!(episode, "Recorder message failed: {}", e);
            }
        }
    }

    fn apply(&mut self, message: RecorderMessage) -> AppResult<()> {
        match message {
            RecorderMessage::Capture(request) => {
                if !self.settings.camera.record_only_after_action {
                    tracing::trace!(episode = request.episode, "Pushed capture ignored in timer mode");
                    return Ok(());
                }
                self.persist(request.activity, request.order, &request.observation)
            }
            RecorderMessage::OrderExecuted { record, .. } => match self.segment.as_mut() {
                Some(segment) => segment.orders.append(&record),
                None => Ok(()),
            },
            RecorderMessage::EpisodeOutcome { outcome, .. } => match self.segment.as_mut() {
                Some(segment) => {
                    segment.orders.flush()?;
                    segment.task.telemetry.flush()?;
                    std::fs::write(segment.layout.status_path(), outcome.as_str())?;
                    tracing::info!(
                        session = segment.layout.id,
                        episode = segment.episode(),
                        "Episode outcome: {}",
                        outcome.as_str()
                    );
                    Ok(())
                }
                None => Ok(()),
            },
            RecorderMessage::ResetFailed { episode } => match self.segment.as_mut() {
                Some(segment) => {
                    tracing::warn!(session = segment.layout.id, episode, "Reset failed");
                    segment.mark_reset_failed()
                }
                None => Ok(()),
            },
        }
    }

    fn persist(&mut self, activity: RobotActivity, order: Option<Order>, observation: &Observation) -> AppResult<()> {
        let segment = self
            .segment
            .as_mut()
            .ok_or_else(|| DaqError::Capture("no open session".to_string()))?;
        segment.write(activity, order, observation, &mut self.report.units)?;
        self.report.frames += 1;
        Ok(())
    }

    /// Make the session of `episode` the open one. Returns false for a stale episode.
    fn ensure_segment(&mut self, episode: u64) -> bool {
        if let Some(current) = self.segment.as_ref().map(Segment::episode) {
            if current == episode {
                return true;
            }
            if current > episode {
                return false;
            }
        } else if episode <= self.last_episode {
            return false;
        }

        self.close_segment();
        let follows_previous = self.last_episode > 0;
        self.last_episode = episode;
        let pause = self.settings.timeout_between_experiments();
        self.paused_until = (follows_previous && !pause.is_zero()).then(|| Instant::now() + pause);

        match self.open_segment(episode) {
            Ok(segment) => {
                tracing::info!(
                    session = segment.layout.id,
                    episode,
                    "Recording into {}",
                    segment.layout.root.display()
                );
                self.report.sessions.push(segment.layout.root.clone());
                self.segment = Some(segment);
                true
            }
            Err(e) => {
                tracing::error!(episode, "Could not open a session: {}", e);
                false
            }
        }
    }

    fn open_segment(&self, episode: u64) -> AppResult<Segment> {
        let layout = self.allocator.allocate()?;
        let metadata = SessionMetadata::builder()
            .settings(&self.settings)
            .session(&layout)
            .episode(episode)
            .run_id(self.run_id)
            .build();
        Segment::open(layout, metadata, &self.settings)
    }

    fn close_segment(&mut self) {
        if let Some(segment) = self.segment.take() {
            let session = segment.layout.id;
            if let Err(e) = segment.close(&mut self.report.units) {
                tracing::error!(session, "Session did not close cleanly: {}", e);
            }
        }
    }
}
