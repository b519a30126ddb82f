//! Built-in tasks.
//!
//! Real grasping tasks live with their deployments and are registered into a
//! [`TaskRegistry`](crate::controller::TaskRegistry). These two cover dry runs
//! and robot setup.

mod calibrate;
mod sweep;

pub use calibrate::CalibrateTask;
pub use sweep::SweepTask;
