//! Observation feed: polls the camera and robot and publishes into the slot.
//!
//! The feed owns the [`ObservationSlot`] and is therefore its only writer.
//! It polls at the camera FPS, independently of the recorder, so the slot
//! always holds an observation at most one period old.

use crate::hardware::{CameraSource, RobotDriver};
use crate::observation::{CameraView, Observation, ObservationSlot};
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Single writer of the observation slot.
pub struct ObservationFeed {
    slot: ObservationSlot,
    camera: Arc<dyn CameraSource>,
    driver: Arc<dyn RobotDriver>,
    period: Duration,
}

impl ObservationFeed {
    /// A feed publishing into `slot` every `period`.
    pub fn new(
        slot: ObservationSlot,
        camera: Arc<dyn CameraSource>,
        driver: Arc<dyn RobotDriver>,
        period: Duration,
    ) -> Self {
        Self {
            slot,
            camera,
            driver,
            period,
        }
    }

    /// Sample once. Returns false if the robot could not be read.
    ///
    /// A view that yields no frame is published as `None`; the recorder skips it.
    pub async fn poll(&mut self) -> bool {
        let telemetry = match self.driver.get_state().await {
            Ok(telemetry) => telemetry,
            Err(e) => {
                tracing::warn!("Telemetry read failed: {:#}", e);
                return false;
            }
        };
        let top = self.camera.get_frame(CameraView::Top).await;
        let bottom = self.camera.get_frame(CameraView::Bottom).await;
        if top.is_none() || bottom.is_none() {
            tracing::debug!(
                top = top.is_some(),
                bottom = bottom.is_some(),
                "Camera returned no frame"
            );
        }

        self.slot.publish(Observation {
            top,
            bottom,
            telemetry,
            timestamp: Utc::now(),
            sequence: 0,
        });
        true
    }

    /// Poll until `stop` or `shutdown` fires. Returns the number of observations published.
    pub async fn run(mut self, stop: ShutdownSignal, shutdown: ShutdownSignal) -> u64 {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut published = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if self.poll().await {
                        published += 1;
                    }
                }
            }
        }
        tracing::debug!(published, "Observation feed stopped");
        published
    }
}
