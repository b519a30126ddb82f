use crate::controller::{Task, TaskContext};
use crate::orders::Order;
use async_trait::async_trait;

/// Visits the four workspace corners, then ends the run.
///
/// ```text
/// 00--01
/// |    |
/// 10--11
/// ```
pub struct CalibrateTask {
    height: f64,
}

impl CalibrateTask {
    /// Visit the corners at `height`.
    pub fn new(height: f64) -> Self {
        Self { height }
    }

    fn orders(&self) -> Vec<Order> {
        vec![
            Order::gripper_close(),
            Order::move_z(1.0),
            Order::move_xy(0.0, 0.0),
            Order::move_z(self.height),
            Order::move_xy(1.0, 0.0),
            Order::move_xy(0.0, 1.0),
            Order::move_xy(1.0, 1.0),
            Order::move_z(1.0),
        ]
    }
}

impl Default for CalibrateTask {
    fn default() -> Self {
        Self::new(0.2)
    }
}

#[async_trait]
impl Task for CalibrateTask {
    fn name(&self) -> &str {
        "calibrate"
    }

    async fn perform_task(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let outcome = ctx.queue_orders(&self.orders(), None, true).await?;
        if outcome.is_completed() {
            tracing::info!("Calibration finished");
            ctx.finish()?;
        }
        Ok(())
    }
}
