//! Mock Hardware Implementations
//!
//! Provides a simulated gripper robot and camera for testing without physical
//! hardware. All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockRobot` - Simulated robot with command latency, a command log and failure injection
//! - `MockCamera` - Simulated two-view camera producing synthetic frames

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::hardware::{CameraSource, RobotDriver};
use crate::observation::{CameraView, Frame, PixelFormat, RobotTelemetry};

// =============================================================================
// MockRobot - Simulated Gripper Robot
// =============================================================================

/// Mock gripper robot
///
/// Simulates a robot with:
/// - Configurable per-command latency (default 10ms)
/// - Thread-safe telemetry tracking
/// - A log of every command it accepted
/// - Failure injection for the next N commands
///
/// # Example
///
/// ```rust,ignore
/// let robot = MockRobot::new();
/// robot.move_xy(0.2, 0.8).await?;
/// assert_eq!(robot.get_state().await?.x, 0.2);
/// ```
#[derive(Clone)]
pub struct MockRobot {
    telemetry: Arc<RwLock<RobotTelemetry>>,
    commands: Arc<RwLock<Vec<String>>>,
    failures_pending: Arc<RwLock<u32>>,
    latency: Duration,
}

impl MockRobot {
    /// Create a mock robot at the workspace centre, gripper open.
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(10))
    }

    /// Create a mock robot with custom command latency.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            telemetry: Arc::new(RwLock::new(RobotTelemetry {
                x: 0.5,
                y: 0.5,
                z: 1.0,
                rotation: 0.0,
                claw: 1.0,
            })),
            commands: Arc::new(RwLock::new(Vec::new())),
            failures_pending: Arc::new(RwLock::new(0)),
            latency,
        }
    }

    /// Make the next `count` motion or gripper commands fail.
    pub async fn fail_next(&self, count: u32) {
        *self.failures_pending.write().await = count;
    }

    /// Every command accepted so far, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.commands.read().await.clone()
    }

    async fn execute(&self, command: String, apply: impl FnOnce(&mut RobotTelemetry)) -> Result<()> {
        {
            let mut pending = self.failures_pending.write().await;
            if *pending > 0 {
                *pending -= 1;
                anyhow::bail!("MockRobot: injected failure for '{}'", command);
            }
        }

        sleep(self.latency).await;

        apply(&mut *self.telemetry.write().await);
        tracing::trace!("MockRobot: {}", command);
        self.commands.write().await.push(command);
        Ok(())
    }
}

impl Default for MockRobot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RobotDriver for MockRobot {
    async fn move_xy(&self, x: f64, y: f64) -> Result<()> {
        self.execute(format!("move_xy({:.2}, {:.2})", x, y), |t| {
            t.x = x;
            t.y = y;
        })
        .await
    }

    async fn move_z(&self, z: f64) -> Result<()> {
        self.execute(format!("move_z({:.2})", z), |t| t.z = z).await
    }

    async fn rotate(&self, degrees: f64) -> Result<()> {
        self.execute(format!("rotate({:.1})", degrees), |t| t.rotation = degrees)
            .await
    }

    async fn gripper_open(&self) -> Result<()> {
        self.execute("gripper_open".to_string(), |t| t.claw = 1.0).await
    }

    async fn gripper_close(&self) -> Result<()> {
        self.execute("gripper_close".to_string(), |t| t.claw = 0.0).await
    }

    async fn move_gripper(&self, opening: f64) -> Result<()> {
        self.execute(format!("move_gripper({:.2})", opening), |t| t.claw = opening)
            .await
    }

    async fn get_state(&self) -> Result<RobotTelemetry> {
        Ok(*self.telemetry.read().await)
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera serving both views
///
/// Simulates a camera with:
/// - Configurable resolution (RGB8)
/// - A moving gradient pattern so consecutive frames differ
/// - Frame counting for diagnostics
/// - An availability switch to simulate a camera that is not ready
pub struct MockCamera {
    resolution: (u32, u32),
    frame_count: Arc<RwLock<u64>>,
    available: Arc<RwLock<bool>>,
}

impl MockCamera {
    /// Create new mock camera with specified resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            frame_count: Arc::new(RwLock::new(0)),
            available: Arc::new(RwLock::new(true)),
        }
    }

    /// Get total number of frames delivered
    pub async fn frame_count(&self) -> u64 {
        *self.frame_count.read().await
    }

    /// Switch frame delivery on or off
    pub async fn set_available(&self, available: bool) {
        *self.available.write().await = available;
    }

    /// Frame width and height.
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

#[async_trait]
impl CameraSource for MockCamera {
    async fn get_frame(&self, view: CameraView) -> Option<Frame> {
        if !*self.available.read().await {
            return None;
        }

        let mut count = self.frame_count.write().await;
        *count += 1;
        let shift = (*count % 256) as u8;
        let offset = match view {
            CameraView::Top => 0u8,
            CameraView::Bottom => 128u8,
        };

        let (width, height) = self.resolution;
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let value = ((x + y) % 256) as u8;
                data.extend_from_slice(&[
                    value.wrapping_add(shift),
                    value.wrapping_add(offset),
                    shift,
                ]);
            }
        }

        Some(Frame {
            width,
            height,
            format: PixelFormat::Rgb8,
            data,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
