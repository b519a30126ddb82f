//! Session directories and session metadata.
//!
//! Every episode is recorded into its own session directory, split into the
//! footage of the task itself and the footage of the workspace being restored:
//!
//! ```text
//! <output_dir>/<experiment>/<session_id>/
//!     session.json        SessionMetadata
//!     orders.jsonl        one OrderRecord per executed order
//!     status.txt          "success" | "fail"
//!     task/               STARTUP and ACTIVE
//!         states.jsonl    one TelemetryRecord per captured observation
//!         Video/clip_<n>.frames, Bottom_Video/clip_<n>.frames
//!         Images/image_top_<i>.ppm, Bottom_Images/image_bottom_<i>.ppm
//!     restore/            RESETTING, same layout as task/
//! ```
//!
//! Session ids are positive integers, one above the highest numeric directory
//! already present. Directories are created with `create_dir`, which fails if
//! the directory exists, so two allocators racing on the same root still never
//! share a session.

use crate::activity::RobotActivity;
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::observation::CameraView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_ALLOCATION_ATTEMPTS: u32 = 64;

/// Part of an episode a recording belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingPhase {
    /// STARTUP and ACTIVE
    Task,
    /// RESETTING
    Restore,
}

impl RecordingPhase {
    /// Sub-directory name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingPhase::Task => "task",
            RecordingPhase::Restore => "restore",
        }
    }

    /// Phase that footage taken during `activity` belongs to.
    pub fn of(activity: RobotActivity) -> Self {
        match activity {
            RobotActivity::Resetting => RecordingPhase::Restore,
            _ => RecordingPhase::Task,
        }
    }
}

/// Hands out fresh session directories under one experiment directory.
#[derive(Debug, Clone)]
pub struct SessionAllocator {
    experiment_dir: PathBuf,
}

impl SessionAllocator {
    /// Allocator for sessions under `experiment_dir`.
    pub fn new(experiment_dir: impl Into<PathBuf>) -> Self {
        Self {
            experiment_dir: experiment_dir.into(),
        }
    }

    /// Directory the sessions are created in.
    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    /// Highest numeric session id currently on disk, 0 if none.
    pub fn latest_id(&self) -> AppResult<u64> {
        if !self.experiment_dir.exists() {
            return Ok(0);
        }
        let mut latest = 0;
        for entry in std::fs::read_dir(&self.experiment_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                latest = latest.max(id);
            }
        }
        Ok(latest)
    }

    /// Create a new, empty session directory.
    pub fn allocate(&self) -> AppResult<SessionLayout> {
        std::fs::create_dir_all(&self.experiment_dir)?;

        let mut id = self.latest_id()? + 1;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let root = self.experiment_dir.join(id.to_string());
            match std::fs::create_dir(&root) {
                Ok(()) => {
                    tracing::debug!("Allocated session directory {}", root.display());
                    return Ok(SessionLayout { id, root });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => id += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DaqError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "Could not allocate a session directory under {} after {} attempts",
                self.experiment_dir.display(),
                MAX_ALLOCATION_ATTEMPTS
            ),
        )))
    }
}

/// Paths inside one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    /// Numeric session id, also the directory name
    pub id: u64,
    /// Session directory
    pub root: PathBuf,
}

impl SessionLayout {
    /// Layout of an existing directory, id taken from its name.
    pub fn existing(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        let id = root
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| {
                DaqError::Configuration(format!("'{}' is not a session directory", root.display()))
            })?;
        Ok(Self { id, root })
    }

    /// `session.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    /// `orders.jsonl`, shared by both phases
    pub fn orders_path(&self) -> PathBuf {
        self.root.join("orders.jsonl")
    }

    /// `status.txt`
    pub fn status_path(&self) -> PathBuf {
        self.root.join("status.txt")
    }

    /// `task/` or `restore/`
    pub fn phase_dir(&self, phase: RecordingPhase) -> PathBuf {
        self.root.join(phase.as_str())
    }

    /// Telemetry log of one phase.
    pub fn telemetry_path(&self, phase: RecordingPhase) -> PathBuf {
        self.phase_dir(phase).join("states.jsonl")
    }

    /// Clip directory of one phase and camera view.
    pub fn video_dir(&self, phase: RecordingPhase, view: CameraView) -> PathBuf {
        let name = match view {
            CameraView::Top => "Video",
            CameraView::Bottom => "Bottom_Video",
        };
        self.phase_dir(phase).join(name)
    }

    /// Image directory of one phase and camera view.
    pub fn images_dir(&self, phase: RecordingPhase, view: CameraView) -> PathBuf {
        let name = match view {
            CameraView::Top => "Images",
            CameraView::Bottom => "Bottom_Images",
        };
        self.phase_dir(phase).join(name)
    }
}

/// Descriptive record written to `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    /// Task identifier
    pub experiment_name: String,
    /// Numeric session id
    pub session_id: u64,
    /// Episode number within the run
    pub episode: u64,
    /// Identifier shared by all sessions of one process run
    pub run_id: Uuid,
    /// Robot identifier
    pub robot_idx: String,
    /// Host the collector ran on
    pub hostname: String,
    /// When the session was opened
    pub started_at: DateTime<Utc>,
    /// Set when the session is closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Frames captured over both phases, set when the session is closed
    #[serde(default)]
    pub frames: u64,
    /// Whether the reset or recovery hook of this episode failed
    #[serde(default)]
    pub reset_failed: bool,
    /// Recorder rate
    pub fps: f64,
    /// Recording mode
    pub record_only_after_action: bool,
    /// Images instead of clip files
    pub save_images_individually: bool,
    /// Maximum frames per clip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_length: Option<u32>,
    /// Version of the collector
    pub software_version: String,
}

impl SessionMetadata {
    /// Start building metadata.
    pub fn builder() -> SessionMetadataBuilder {
        SessionMetadataBuilder::default()
    }

    /// Write `session.json`, replacing any previous version.
    pub fn write_to(&self, layout: &SessionLayout) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(layout.metadata_path(), json)?;
        Ok(())
    }

    /// Read `session.json`.
    pub fn read_from(layout: &SessionLayout) -> AppResult<Self> {
        let text = std::fs::read_to_string(layout.metadata_path())?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// A builder for constructing `SessionMetadata` instances.
pub struct SessionMetadataBuilder {
    inner: SessionMetadata,
}

impl Default for SessionMetadataBuilder {
    fn default() -> Self {
        Self {
            inner: SessionMetadata {
                experiment_name: String::new(),
                session_id: 0,
                episode: 0,
                run_id: Uuid::nil(),
                robot_idx: String::new(),
                hostname: local_hostname(),
                started_at: Utc::now(),
                finished_at: None,
                frames: 0,
                reset_failed: false,
                fps: 0.0,
                record_only_after_action: false,
                save_images_individually: false,
                clip_length: None,
                software_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl SessionMetadataBuilder {
    /// Copy experiment and camera fields from the settings.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.inner.experiment_name = settings.experiment.name.clone();
        self.inner.robot_idx = settings.experiment.robot_idx.clone();
        self.inner.fps = settings.camera.fps;
        self.inner.record_only_after_action = settings.camera.record_only_after_action;
        self.inner.save_images_individually = settings.camera.save_images_individually;
        self.inner.clip_length = settings.camera.clip_length;
        self
    }

    /// Session id from the layout.
    pub fn session(mut self, layout: &SessionLayout) -> Self {
        self.inner.session_id = layout.id;
        self
    }

    /// Episode number.
    pub fn episode(mut self, episode: u64) -> Self {
        self.inner.episode = episode;
        self
    }

    /// Run identifier.
    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.inner.run_id = run_id;
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionMetadata {
        self.inner
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
