//! Camera frames, robot telemetry, and the shared "latest observation" slot.
//!
//! The slot holds at most one [`Observation`] and is overwritten on every poll.
//! Published observations are wrapped in `Arc` and never mutated afterwards, so
//! a reader's snapshot stays consistent for as long as it holds it, no matter
//! how many times the slot is overwritten in the meantime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome, 1 byte/pixel
    Mono8,
    /// 8-bit RGB, 3 bytes/pixel
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One camera image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Row-major pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Expected length of `data` for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Whether `data` matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

/// Which camera a frame comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraView {
    /// Overhead camera
    Top,
    /// Camera under the workspace
    Bottom,
}

impl CameraView {
    /// Lowercase name used in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraView::Top => "top",
            CameraView::Bottom => "bottom",
        }
    }
}

/// Robot state as reported by the driver. Positions are normalised to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotTelemetry {
    /// Horizontal position
    pub x: f64,
    /// Depth position
    pub y: f64,
    /// Height
    pub z: f64,
    /// Rotation in degrees
    pub rotation: f64,
    /// Gripper opening
    pub claw: f64,
}

/// One camera + telemetry sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Overhead frame, `None` if the camera returned nothing
    pub top: Option<Frame>,
    /// Bottom frame, `None` if the camera returned nothing
    pub bottom: Option<Frame>,
    /// Robot state at sampling time
    pub telemetry: RobotTelemetry,
    /// Sampling time
    pub timestamp: DateTime<Utc>,
    /// Monotonic poll counter assigned by the slot
    pub sequence: u64,
}

impl Observation {
    /// Both frames present and well formed.
    pub fn has_frames(&self) -> bool {
        matches!((&self.top, &self.bottom), (Some(t), Some(b)) if t.is_well_formed() && b.is_well_formed())
    }
}

/// Writer half of the latest-observation slot. Not `Clone`: one writer only.
#[derive(Debug)]
pub struct ObservationSlot {
    tx: watch::Sender<Option<Arc<Observation>>>,
    sequence: u64,
}

impl Default for ObservationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationSlot {
    /// An empty slot. Readers see `None` until the first publish.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx, sequence: 0 }
    }

    /// A new read handle.
    pub fn reader(&self) -> ObservationReader {
        ObservationReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Replace the slot content. The sequence number is assigned here.
    pub fn publish(&mut self, mut observation: Observation) -> Arc<Observation> {
        self.sequence += 1;
        observation.sequence = self.sequence;
        let observation = Arc::new(observation);
        self.tx.send_replace(Some(Arc::clone(&observation)));
        observation
    }
}

/// Read handle on the slot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ObservationReader {
    rx: watch::Receiver<Option<Arc<Observation>>>,
}

impl ObservationReader {
    /// Snapshot of the latest observation, `None` if nothing was published yet.
    pub fn latest(&self) -> Option<Arc<Observation>> {
        self.rx.borrow().clone()
    }
}
