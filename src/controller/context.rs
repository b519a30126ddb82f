//! Primitives available to task hooks.

use crate::activity::{ActivityCell, ActivityReader, RobotActivity};
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::hardware::RobotDriver;
use crate::observation::{Observation, ObservationReader};
use crate::orders::{Order, OrderExecutor, OrderListener, OrderRecord, QueueOutcome};
use crate::recorder::{CaptureRequest, RecorderLink, RecorderMessage};
use crate::shutdown::{ShutdownSignal, Slept};
use std::sync::Arc;
use std::time::Duration;

/// Everything a task can touch while it runs.
///
/// The context owns the [`ActivityCell`], so the controller (through its
/// context) is the only writer of the activity state.
pub struct TaskContext {
    executor: OrderExecutor,
    activity: ActivityCell,
    observations: ObservationReader,
    recorder: RecorderLink,
    shutdown: ShutdownSignal,
    settings: Arc<Settings>,
    failed: bool,
    finish_requested: bool,
}

impl TaskContext {
    /// Context whose orders go to `driver` and whose records go to `recorder`.
    pub fn new(
        settings: Arc<Settings>,
        driver: Arc<dyn RobotDriver>,
        activity: ActivityCell,
        observations: ObservationReader,
        recorder: RecorderLink,
        shutdown: ShutdownSignal,
    ) -> Self {
        let executor = OrderExecutor::new(driver, shutdown.clone(), settings.time_between_orders());
        Self {
            executor,
            activity,
            observations,
            recorder,
            shutdown,
            settings,
            failed: false,
            finish_requested: false,
        }
    }

    /// Run configuration.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current activity.
    pub fn activity(&self) -> RobotActivity {
        self.activity.get_state()
    }

    /// A reader on the activity cell.
    pub fn activity_reader(&self) -> ActivityReader {
        self.activity.reader()
    }

    /// Current episode number, starting at 1.
    pub fn episode(&self) -> u64 {
        self.activity.snapshot().episode
    }

    /// Process-wide shutdown signal.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Whether the current episode has been marked as failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Mark the current episode as failed. Cleared after reset or recovery.
    pub fn mark_failed(&mut self) {
        if !self.failed {
            tracing::info!(episode = self.episode(), "Episode marked as failed");
        }
        self.failed = true;
    }

    pub(crate) fn clear_failed(&mut self) {
        self.failed = false;
    }

    pub(crate) fn set_state(&self, next: RobotActivity) -> AppResult<()> {
        self.activity.set_state(next).map(|_| ())
    }

    pub(crate) fn recorder(&self) -> &RecorderLink {
        &self.recorder
    }

    /// Latest observation in the shared slot.
    pub fn latest_observation(&self) -> Option<Arc<Observation>> {
        self.observations.latest()
    }

    /// Sleep unless shutdown fires first.
    pub async fn sleep(&self, duration: Duration) -> Slept {
        self.shutdown.sleep(duration).await
    }

    /// End the run after this episode. Only valid while ACTIVE.
    ///
    /// The controller moves to FINISHED once the current hook returns; no
    /// further orders are accepted in the meantime.
    pub fn finish(&mut self) -> AppResult<()> {
        let state = self.activity();
        if state != RobotActivity::Active {
            return Err(DaqError::Protocol {
                from: state,
                to: RobotActivity::Finished,
            });
        }
        tracing::info!(episode = self.episode(), "Task finished");
        self.finish_requested = true;
        Ok(())
    }

    /// Whether [`TaskContext::finish`] was called.
    pub fn finish_requested(&self) -> bool {
        self.finish_requested
    }

    /// Execute `orders` in sequence, sleeping `delay` (or `time_between_orders`) after each.
    ///
    /// Every executed order is logged to the session. With `record_after_each`,
    /// one capture is requested after each settled order, but only in
    /// after-action recording mode and while ACTIVE or RESETTING.
    pub async fn queue_orders(
        &self,
        orders: &[Order],
        delay: Option<Duration>,
        record_after_each: bool,
    ) -> AppResult<QueueOutcome> {
        let state = self.activity();
        if state.is_terminal() {
            return Err(DaqError::OrdersRejected(state));
        }
        if self.finish_requested {
            return Err(DaqError::OrdersRejected(RobotActivity::Finished));
        }
        let mut listener = EpisodeListener {
            context: self,
            record: record_after_each,
        };
        self.executor.queue_orders(orders, delay, &mut listener).await
    }

    /// Hand the current observation to the recorder, stamped with `order`.
    ///
    /// Never waits on the camera: it copies whatever the slot holds. An empty
    /// slot is a [`DaqError::Capture`].
    pub fn record_current_state(&self, order: Option<&Order>) -> AppResult<()> {
        let observation = self
            .observations
            .latest()
            .ok_or_else(|| DaqError::Capture("no observation available yet".to_string()))?;
        let snapshot = self.activity.snapshot();
        self.recorder.send(RecorderMessage::Capture(CaptureRequest {
            episode: snapshot.episode,
            activity: snapshot.state,
            order: order.cloned(),
            observation,
        }));
        Ok(())
    }

    fn capture_enabled(&self) -> bool {
        self.settings.camera.record_only_after_action
            && matches!(self.activity(), RobotActivity::Active | RobotActivity::Resetting)
    }
}

/// Forwards queue progress to the recorder.
struct EpisodeListener<'a> {
    context: &'a TaskContext,
    record: bool,
}

impl OrderListener for EpisodeListener<'_> {
    fn order_executed(&mut self, record: &OrderRecord) {
        self.context.recorder.send(RecorderMessage::OrderExecuted {
            episode: self.context.episode(),
            record: record.clone(),
        });
    }

    fn order_settled(&mut self, record: &OrderRecord) {
        if !self.record || !self.context.capture_enabled() {
            return;
        }
        if let Err(e) = self.context.record_current_state(Some(&record.order)) {
            tracing::warn!(episode = self.context.episode(), "Capture after {} skipped: {}", record.order, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockRobot;
    use crate::observation::tests::sample_observation;
    use crate::observation::ObservationSlot;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn context(after_action: bool) -> (TaskContext, ObservationSlot, UnboundedReceiver<RecorderMessage>) {
        let mut settings = Settings::default();
        settings.camera.record_only_after_action = after_action;
        settings.experiment.time_between_orders = 0.0;
        let slot = ObservationSlot::new();
        let (link, inbox) = RecorderLink::channel();
        let ctx = TaskContext::new(
            Arc::new(settings),
            Arc::new(MockRobot::with_latency(Duration::ZERO)),
            ActivityCell::new(),
            slot.reader(),
            link,
            ShutdownSignal::new(),
        );
        (ctx, slot, inbox)
    }

    fn drain(inbox: &mut UnboundedReceiver<RecorderMessage>) -> (usize, usize) {
        let (mut captures, mut orders) = (0, 0);
        while let Ok(message) = inbox.try_recv() {
            match message {
                RecorderMessage::Capture(_) => captures += 1,
                RecorderMessage::OrderExecuted { .. } => orders += 1,
                RecorderMessage::EpisodeOutcome { .. } | RecorderMessage::ResetFailed { .. } => {}
            }
        }
        (captures, orders)
    }

    #[tokio::test]
    async fn test_record_without_observation_is_capture_error() {
        let (ctx, _slot, mut inbox) = context(true);
        let err = ctx.record_current_state(None).unwrap_err();
        assert!(matches!(err, DaqError::Capture(_)));
        assert_eq!(drain(&mut inbox), (0, 0));
    }

    #[tokio::test]
    async fn test_captures_gated_by_mode_and_state() {
        let orders = [Order::move_z(0.5), Order::gripper_open(), Order::move_z(1.0)];

        let (ctx, mut slot, mut inbox) = context(true);
        slot.publish(sample_observation(1));
        ctx.queue_orders(&orders, None, true).await.unwrap();
        assert_eq!(drain(&mut inbox), (0, 3), "no captures during STARTUP");

        ctx.set_state(RobotActivity::Active).unwrap();
        ctx.queue_orders(&orders, None, true).await.unwrap();
        assert_eq!(drain(&mut inbox), (3, 3));

        let (ctx, mut slot, mut inbox) = context(false);
        slot.publish(sample_observation(1));
        ctx.set_state(RobotActivity::Active).unwrap();
        ctx.queue_orders(&orders, None, true).await.unwrap();
        assert_eq!(drain(&mut inbox), (0, 3), "timer mode never pushes");
    }

    #[tokio::test]
    async fn test_orders_rejected_after_finish() {
        let (mut ctx, _slot, _inbox) = context(true);
        assert!(matches!(ctx.finish(), Err(DaqError::Protocol { .. })));
        ctx.set_state(RobotActivity::Active).unwrap();
        ctx.finish().unwrap();
        assert!(ctx.finish_requested());

        let err = ctx.queue_orders(&[Order::move_z(0.5)], None, false).await.unwrap_err();
        assert!(matches!(err, DaqError::OrdersRejected(RobotActivity::Finished)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_driver_failure_stops_queue() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        robot.fail_next(1).await;
        let (link, _inbox) = RecorderLink::channel();
        let ctx = TaskContext::new(
            Arc::new(Settings::default()),
            Arc::new(robot.clone()),
            ActivityCell::new(),
            ObservationSlot::new().reader(),
            link,
            ShutdownSignal::new(),
        );

        let err = ctx
            .queue_orders(&[Order::move_z(0.5), Order::move_z(0.1)], Some(Duration::ZERO), false)
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Driver(_)));
        assert!(!err.is_fatal());
        assert!(robot.commands().await.is_empty());
    }
}
