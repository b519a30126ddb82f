//! Robot activity state machine.
//!
//! The activity is the phase of the current episode. It has exactly one writer,
//! the task controller, which owns the [`ActivityCell`]. Everyone else (recorder,
//! coordinator, preview surfaces) holds an [`ActivityReader`] and takes `Copy`
//! snapshots, so a reader never observes a half-applied transition and never
//! blocks the writer.
//!
//! # Transition graph
//!
//! ```text
//!             +-----------------------------+
//!             v                             |
//! STARTUP -> ACTIVE -> RESETTING -> STARTUP (next episode)
//!              |  ^        |
//!              |  +--------+
//!              +-> FINISHED <- RESETTING
//!              +-> FAILED   <- RESETTING
//! ```
//!
//! FINISHED and FAILED are terminal. Entering STARTUP from RESETTING starts a
//! new episode and bumps the episode number carried in the snapshot.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Phase of the current episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotActivity {
    /// Preparing the workspace before the task starts
    Startup,
    /// The task is running
    Active,
    /// Restoring the workspace after the task
    Resetting,
    /// The run ended normally
    Finished,
    /// The run ended on a fatal error
    Failed,
}

impl RobotActivity {
    /// Upper-case name used in logs and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotActivity::Startup => "STARTUP",
            RobotActivity::Active => "ACTIVE",
            RobotActivity::Resetting => "RESETTING",
            RobotActivity::Finished => "FINISHED",
            RobotActivity::Failed => "FAILED",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RobotActivity::Finished | RobotActivity::Failed)
    }

    /// Whether `self -> next` is an edge of the transition graph.
    pub fn can_transition_to(self, next: RobotActivity) -> bool {
        use RobotActivity::*;
        matches!(
            (self, next),
            (Startup, Active)
                | (Active, Resetting)
                | (Active, Finished)
                | (Active, Failed)
                | (Resetting, Active)
                | (Resetting, Failed)
                | (Resetting, Startup)
                | (Resetting, Finished)
        )
    }
}

impl fmt::Display for RobotActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of the activity at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    /// Current phase
    pub state: RobotActivity,
    /// 1-based episode number; bumped on every RESETTING -> STARTUP
    pub episode: u64,
    /// Number of transitions applied so far
    pub version: u64,
}

impl ActivitySnapshot {
    fn initial() -> Self {
        Self {
            state: RobotActivity::Startup,
            episode: 1,
            version: 0,
        }
    }
}

/// The writer half of the activity state. Deliberately not `Clone`.
#[derive(Debug)]
pub struct ActivityCell {
    tx: watch::Sender<ActivitySnapshot>,
}

impl Default for ActivityCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityCell {
    /// A cell in STARTUP of episode 1.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ActivitySnapshot::initial());
        Self { tx }
    }

    /// A new read handle.
    pub fn reader(&self) -> ActivityReader {
        ActivityReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Current state.
    pub fn get_state(&self) -> RobotActivity {
        self.tx.borrow().state
    }

    /// Current state with its episode and version.
    pub fn snapshot(&self) -> ActivitySnapshot {
        *self.tx.borrow()
    }

    /// Apply a transition, or fail with [`DaqError::Protocol`] if the graph forbids it.
    ///
    /// Illegal transitions leave the state untouched and wake no reader.
    pub fn set_state(&self, next: RobotActivity) -> AppResult<ActivitySnapshot> {
        let mut outcome = Err(DaqError::Protocol {
            from: next,
            to: next,
        });
        self.tx.send_if_modified(|snapshot| {
            let from = snapshot.state;
            if !from.can_transition_to(next) {
                outcome = Err(DaqError::Protocol { from, to: next });
                return false;
            }
            if next == RobotActivity::Startup {
                snapshot.episode += 1;
            }
            snapshot.state = next;
            snapshot.version += 1;
            outcome = Ok(*snapshot);
            true
        });

        match &outcome {
            Ok(snapshot) => tracing::debug!(
                episode = snapshot.episode,
                "Activity -> {}",
                snapshot.state
            ),
            Err(err) => tracing::error!("{}", err),
        }
        outcome
    }
}

/// Read handle on the activity state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ActivityReader {
    rx: watch::Receiver<ActivitySnapshot>,
}

impl ActivityReader {
    /// Copy of the latest snapshot.
    pub fn snapshot(&self) -> ActivitySnapshot {
        *self.rx.borrow()
    }

    /// Latest state.
    pub fn get_state(&self) -> RobotActivity {
        self.rx.borrow().state
    }

    /// Wait for the next transition. Returns `None` once the writer is gone.
    pub async fn changed(&mut self) -> Option<ActivitySnapshot> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RobotActivity::*;

    const ALL: [RobotActivity; 5] = [Startup, Active, Resetting, Finished, Failed];

    #[test]
    fn test_valid_sequences_succeed() {
        let sequences: &[&[RobotActivity]] = &[
            &[Active, Resetting, Startup, Active, Finished],
            &[Active, Resetting, Active, Resetting, Failed],
            &[Active, Failed],
            &[Active, Resetting, Finished],
            &[Active, Resetting, Startup, Active, Resetting, Startup],
        ];
        for sequence in sequences {
            let cell = ActivityCell::new();
            for &next in *sequence {
                cell.set_state(next)
                    .unwrap_or_else(|e| panic!("{:?} rejected: {}", sequence, e));
            }
            assert_eq!(cell.get_state(), *sequence.last().unwrap());
        }
    }

    #[test]
    fn test_every_illegal_pair_is_protocol_error() {
        let legal = [
            (Startup, Active),
            (Active, Resetting),
            (Active, Finished),
            (Active, Failed),
            (Resetting, Active),
            (Resetting, Failed),
            (Resetting, Startup),
            (Resetting, Finished),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }

        let cell = ActivityCell::new();
        let err = cell.set_state(Finished).unwrap_err();
        assert!(matches!(
            err,
            DaqError::Protocol {
                from: Startup,
                to: Finished
            }
        ));
        assert_eq!(cell.get_state(), Startup);
        assert_eq!(cell.snapshot().version, 0);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [Finished, Failed] {
            let cell = ActivityCell::new();
            cell.set_state(Active).unwrap();
            cell.set_state(terminal).unwrap();
            assert!(cell.get_state().is_terminal());
            for next in ALL {
                assert!(cell.set_state(next).is_err());
            }
        }
    }

    #[test]
    fn test_episode_number_bumps_on_startup() {
        let cell = ActivityCell::new();
        let reader = cell.reader();
        assert_eq!(reader.snapshot().episode, 1);

        cell.set_state(Active).unwrap();
        cell.set_state(Resetting).unwrap();
        assert_eq!(reader.snapshot().episode, 1);

        let snapshot = cell.set_state(Startup).unwrap();
        assert_eq!(snapshot.episode, 2);
        assert_eq!(snapshot.version, 3);
        assert_eq!(reader.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_reader_observes_transitions() {
        let cell = ActivityCell::new();
        let mut reader = cell.reader();

        let handle = tokio::spawn(async move { reader.changed().await });
        tokio::task::yield_now().await;
        cell.set_state(Active).unwrap();

        let seen = handle.await.unwrap().unwrap();
        assert_eq!(seen.state, Active);

        let mut reader = cell.reader();
        drop(cell);
        assert!(reader.changed().await.is_none());
    }
}
