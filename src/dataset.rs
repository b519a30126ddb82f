//! Offline access to recorded sessions.
//!
//! ```rust,ignore
//! let session = RecordedSession::load("recorded_data/sweep/3")?;
//! for clip in session.task().clips(CameraView::Top) {
//!     let frames = read_clip(clip)?;
//! }
//! let restore_states = &session.restore().telemetry;
//! ```

use crate::error::AppResult;
use crate::observation::CameraView;
use crate::orders::OrderRecord;
use crate::recorder::{read_json_lines, EpisodeOutcome, TelemetryRecord};
use crate::session::{RecordingPhase, SessionAllocator, SessionLayout, SessionMetadata};
use std::path::{Path, PathBuf};

pub use crate::recorder::{read_clip, FrameRecord};

/// Output of one phase of a recorded session.
#[derive(Debug, Clone)]
pub struct RecordedPhase {
    /// Which phase this is
    pub phase: RecordingPhase,
    /// Telemetry rows in capture order
    pub telemetry: Vec<TelemetryRecord>,
    top_clips: Vec<PathBuf>,
    bottom_clips: Vec<PathBuf>,
    top_images: Vec<PathBuf>,
    bottom_images: Vec<PathBuf>,
}

impl RecordedPhase {
    fn load(layout: &SessionLayout, phase: RecordingPhase) -> AppResult<Self> {
        let clips = |view| list_numbered(&layout.video_dir(phase, view), "clip_", ".frames");
        let images = |view, prefix| list_numbered(&layout.images_dir(phase, view), prefix, "");
        Ok(Self {
            phase,
            telemetry: read_json_lines(&layout.telemetry_path(phase))?,
            top_clips: clips(CameraView::Top)?,
            bottom_clips: clips(CameraView::Bottom)?,
            top_images: images(CameraView::Top, "image_top_")?,
            bottom_images: images(CameraView::Bottom, "image_bottom_")?,
        })
    }

    /// Clip files of `view`, in clip order.
    pub fn clips(&self, view: CameraView) -> &[PathBuf] {
        match view {
            CameraView::Top => &self.top_clips,
            CameraView::Bottom => &self.bottom_clips,
        }
    }

    /// Individually saved images of `view`, in frame order.
    pub fn images(&self, view: CameraView) -> &[PathBuf] {
        match view {
            CameraView::Top => &self.top_images,
            CameraView::Bottom => &self.bottom_images,
        }
    }

    /// Every frame of `view` across all clips.
    pub fn frames(&self, view: CameraView) -> AppResult<Vec<FrameRecord>> {
        let mut frames = Vec::new();
        for clip in self.clips(view) {
            frames.extend(read_clip(clip)?);
        }
        Ok(frames)
    }
}

/// Everything written for one session, except frame data.
#[derive(Debug, Clone)]
pub struct RecordedSession {
    /// Session paths
    pub layout: SessionLayout,
    /// Contents of `session.json`
    pub metadata: SessionMetadata,
    /// `None` if the episode never reached an outcome (e.g. interrupted)
    pub status: Option<EpisodeOutcome>,
    /// Executed orders
    pub orders: Vec<OrderRecord>,
    task: RecordedPhase,
    restore: RecordedPhase,
}

impl RecordedSession {
    /// Read one session directory.
    pub fn load(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let layout = SessionLayout::existing(dir)?;
        let metadata = SessionMetadata::read_from(&layout)?;
        let status = match std::fs::read_to_string(layout.status_path()) {
            Ok(text) => EpisodeOutcome::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            orders: read_json_lines(&layout.orders_path())?,
            task: RecordedPhase::load(&layout, RecordingPhase::Task)?,
            restore: RecordedPhase::load(&layout, RecordingPhase::Restore)?,
            layout,
            metadata,
            status,
        })
    }

    /// Every session under an experiment directory, by ascending id.
    pub fn load_all(experiment_dir: &Path) -> AppResult<Vec<Self>> {
        let latest = SessionAllocator::new(experiment_dir).latest_id()?;
        let mut sessions = Vec::new();
        for id in 1..=latest {
            let dir = experiment_dir.join(id.to_string());
            if dir.join("session.json").is_file() {
                sessions.push(Self::load(dir)?);
            }
        }
        Ok(sessions)
    }

    /// STARTUP and ACTIVE footage.
    pub fn task(&self) -> &RecordedPhase {
        &self.task
    }

    /// RESETTING footage.
    pub fn restore(&self) -> &RecordedPhase {
        &self.restore
    }

    /// One phase by name.
    pub fn phase(&self, phase: RecordingPhase) -> &RecordedPhase {
        match phase {
            RecordingPhase::Task => &self.task,
            RecordingPhase::Restore => &self.restore,
        }
    }

    /// Telemetry rows of both phases, task first.
    pub fn telemetry(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.task.telemetry.iter().chain(self.restore.telemetry.iter())
    }
}

/// Files named `<prefix><n><suffix...>` in `dir`, sorted by `n`. Missing dir reads as empty.
fn list_numbered(dir: &Path, prefix: &str, suffix: &str) -> AppResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        if !rest.ends_with(suffix) {
            continue;
        }
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(n) = digits.parse::<u64>() {
            numbered.push((n, path));
        }
    }
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_numbered_sorts_numerically() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["clip_10.frames", "clip_2.frames", "clip_0.frames", "notes.txt"] {
            std::fs::write(temp_dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_numbered(temp_dir.path(), "clip_", ".frames")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["clip_0.frames", "clip_2.frames", "clip_10.frames"]);

        assert!(list_numbered(&temp_dir.path().join("Video"), "clip_", ".frames")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_load_requires_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("1");
        std::fs::create_dir(&dir).unwrap();
        assert!(RecordedSession::load(&dir).is_err());
        assert!(RecordedSession::load_all(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_reads_both_phases() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = SessionAllocator::new(temp_dir.path()).allocate().unwrap();
        SessionMetadata::builder().session(&layout).episode(1).build().write_to(&layout).unwrap();
        for (phase, clips) in [(RecordingPhase::Task, 2), (RecordingPhase::Restore, 1)] {
            let dir = layout.video_dir(phase, CameraView::Bottom);
            std::fs::create_dir_all(&dir).unwrap();
            for clip in 0..clips {
                std::fs::write(dir.join(format!("clip_{}.frames", clip)), b"").unwrap();
            }
        }
        std::fs::write(layout.status_path(), "success").unwrap();

        let session = RecordedSession::load(&layout.root).unwrap();
        assert_eq!(session.status, Some(EpisodeOutcome::Success));
        assert_eq!(session.task().clips(CameraView::Bottom).len(), 2);
        assert_eq!(session.restore().clips(CameraView::Bottom).len(), 1);
        assert!(session.phase(RecordingPhase::Restore).clips(CameraView::Top).is_empty());
        assert_eq!(session.restore().phase, RecordingPhase::Restore);
        assert_eq!(session.telemetry().count(), 0);
    }
}
