//! Messages from the task controller to the recorder.
//!
//! The controller never waits on the recorder: everything it hands over goes
//! through an unbounded channel and is applied on the recorder's next tick.
//! Each message carries the episode it belongs to, so a message that is still
//! in flight when the next episode starts lands in the right session.

use crate::activity::RobotActivity;
use crate::observation::Observation;
use crate::orders::{Order, OrderRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How an episode ended, written to `status.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeOutcome {
    /// The task succeeded
    Success,
    /// The task failed or was marked failed
    Fail,
}

impl EpisodeOutcome {
    /// Text written to `status.txt`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeOutcome::Success => "success",
            EpisodeOutcome::Fail => "fail",
        }
    }

    /// Parse `status.txt` contents, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "success" => Some(EpisodeOutcome::Success),
            "fail" => Some(EpisodeOutcome::Fail),
            _ => None,
        }
    }
}

/// A snapshot pushed by `record_current_state`.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Episode the capture belongs to
    pub episode: u64,
    /// Activity when the capture was taken
    pub activity: RobotActivity,
    /// The order that was just executed, if any
    pub order: Option<Order>,
    /// The captured observation
    pub observation: Arc<Observation>,
}

/// Commands accepted by the recorder
#[derive(Debug)]
pub enum RecorderMessage {
    /// Persist one observation
    Capture(CaptureRequest),

    /// Append an executed order to the order log
    OrderExecuted {
        /// Episode the order ran in
        episode: u64,
        /// Execution record
        record: OrderRecord,
    },

    /// Write the episode status file
    EpisodeOutcome {
        /// Episode that ended
        episode: u64,
        /// How it ended
        outcome: EpisodeOutcome,
    },

    /// The reset or recovery hook failed; the workspace may not be restored
    ResetFailed {
        /// Episode whose reset failed
        episode: u64,
    },
}

impl RecorderMessage {
    /// Episode the message belongs to.
    pub fn episode(&self) -> u64 {
        match self {
            RecorderMessage::Capture(request) => request.episode,
            RecorderMessage::OrderExecuted { episode, .. }
            | RecorderMessage::EpisodeOutcome { episode, .. }
            | RecorderMessage::ResetFailed { episode } => *episode,
        }
    }
}

/// Sending half held by the task controller.
#[derive(Debug, Clone)]
pub struct RecorderLink {
    tx: mpsc::UnboundedSender<RecorderMessage>,
}

impl RecorderLink {
    /// A linked sender/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RecorderMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message. Returns false once the recorder is gone.
    pub fn send(&self, message: RecorderMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    episode = err.0.episode(),
                    "Recorder is no longer listening; message dropped"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_text() {
        assert_eq!(EpisodeOutcome::Success.as_str(), "success");
        assert_eq!(EpisodeOutcome::parse("fail\n"), Some(EpisodeOutcome::Fail));
        assert_eq!(EpisodeOutcome::parse("partial"), None);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (link, rx) = RecorderLink::channel();
        let message = || RecorderMessage::EpisodeOutcome {
            episode: 1,
            outcome: EpisodeOutcome::Success,
        };
        assert!(link.send(message()));
        drop(rx);
        assert!(!link.send(message()));
    }
}
