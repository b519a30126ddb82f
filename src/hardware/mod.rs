//! Capability traits for the external robot and camera collaborators.
//!
//! The collector never talks to hardware directly. A robot client implements
//! [`RobotDriver`], a camera pipeline (including any undistortion) implements
//! [`CameraSource`], and both are handed to the coordinator as trait objects.
//! [`mock`] provides simulated implementations for tests and dry runs.

pub mod mock;

use crate::observation::{CameraView, Frame, RobotTelemetry};
use anyhow::Result;
use async_trait::async_trait;

/// Motion and gripper control of one robot.
///
/// Positions are normalised to [0, 1]; rotation is in degrees. Any method may
/// fail; the order executor reports that as a driver error for the order.
#[async_trait]
pub trait RobotDriver: Send + Sync {
    /// Move in the horizontal plane.
    async fn move_xy(&self, x: f64, y: f64) -> Result<()>;
    /// Move to height `z`.
    async fn move_z(&self, z: f64) -> Result<()>;
    /// Rotate the gripper to `degrees`.
    async fn rotate(&self, degrees: f64) -> Result<()>;
    /// Open the gripper fully.
    async fn gripper_open(&self) -> Result<()>;
    /// Close the gripper fully.
    async fn gripper_close(&self) -> Result<()>;
    /// Move the gripper to a specific opening.
    async fn move_gripper(&self, opening: f64) -> Result<()>;
    /// Current robot telemetry.
    async fn get_state(&self) -> Result<RobotTelemetry>;
}

/// Frame source for both camera views.
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Latest frame from `view`, or `None` if the camera could not deliver one.
    async fn get_frame(&self, view: CameraView) -> Option<Frame>;
}
