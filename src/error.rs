//! Custom error types for the collector.
//!
//! `DaqError` is the single error type shared by every unit of the collector.
//! The variants follow the propagation policy of the system:
//!
//! - **`Configuration`** / **`Config`**: a missing or invalid configuration value, or an
//!   unknown order kind or task id. Fatal at startup, never retried.
//! - **`Protocol`**: an illegal activity transition. Fatal; it means the task
//!   controller itself is wrong.
//! - **`Driver`**: a robot command failed. Recorded as the order's failure; the task
//!   marks itself failed and the controller proceeds to recovery.
//! - **`Capture`**: a camera or telemetry read failed. Degrades to a skipped recorder tick.
//! - **`OrdersRejected`**: orders queued after the run reached a terminal state. Fatal, like `Protocol`.
//! - **`Task`**: a hook failed in a way that cannot be contained (a failed `startup`).
//!
//! Only the fatal variants ever surface from the coordinator. Everything else is
//! contained at the drive-loop or tick boundary and logged.

use crate::activity::RobotActivity;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every error the collector reports.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value or task argument is invalid
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A transition the activity graph forbids
    #[error("Illegal activity transition {from} -> {to}")]
    Protocol {
        /// State before the attempt
        from: RobotActivity,
        /// Requested state
        to: RobotActivity,
    },

    /// The robot rejected or failed a command
    #[error("Driver error: {0}")]
    Driver(String),

    /// An observation could not be taken or persisted
    #[error("Capture error: {0}")]
    Capture(String),

    /// Orders queued outside ACTIVE or RESETTING
    #[error("Orders rejected: activity is {0}")]
    OrdersRejected(RobotActivity),

    /// A task hook failed in a way that ends the run
    #[error("Task '{task}' failed in {hook}: {message}")]
    Task {
        /// Task identifier
        task: String,
        /// Hook that failed
        hook: &'static str,
        /// Error chain, formatted
        message: String,
    },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document could not be written or read
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame record could not be encoded or decoded
    #[error("Frame encoding error: {0}")]
    Encode(#[from] bincode::Error),

    /// A spawned unit panicked or was aborted
    #[error("Unit '{0}' did not shut down cleanly")]
    Join(String),

    /// More than one unit failed while stopping
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Errors that must halt the run instead of being contained.
    pub fn is_fatal(&self) -> bool {
        match self {
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Protocol { .. }
            | DaqError::OrdersRejected(_)
            | DaqError::Task { .. } => true,
            DaqError::ShutdownFailed(errors) => errors.iter().any(DaqError::is_fatal),
            _ => false,
        }
    }

    /// Classifies an error returned from a task hook.
    ///
    /// Hooks return `anyhow::Error`; anything that is not a fatal `DaqError`
    /// somewhere in its chain is a task-level failure.
    pub fn is_fatal_hook_error(err: &anyhow::Error) -> bool {
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<DaqError>())
            .any(DaqError::is_fatal)
    }
}
