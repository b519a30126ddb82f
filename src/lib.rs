//! Core library for the grasp_daq collector.
//!
//! A task controller drives a robot through episodes while an independent
//! recorder persists camera frames and telemetry into one session directory
//! per episode. The [`coordinator`] wires both together around three shared
//! resources: the activity state, the latest-observation slot and the
//! shutdown signal.

pub mod activity;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod dataset;
pub mod error;
pub mod feed;
pub mod hardware;
pub mod observation;
pub mod orders;
pub mod recorder;
pub mod session;
pub mod shutdown;
pub mod tasks;

pub use activity::RobotActivity;
pub use config::Settings;
pub use controller::{Task, TaskContext, TaskRegistry};
pub use coordinator::{Coordinator, CoordinatorHandle, RunReport};
pub use error::{AppResult, DaqError};
pub use orders::{Order, OrderKind, QueueOutcome};
pub use shutdown::ShutdownSignal;
