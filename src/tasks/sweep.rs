use crate::controller::{Task, TaskContext};
use crate::orders::Order;
use async_trait::async_trait;

/// Pick-and-place motion over a row of grasp positions, one column per episode.
pub struct SweepTask {
    columns: Vec<f64>,
    row: f64,
    grasp_height: f64,
    next: usize,
}

impl SweepTask {
    /// Sweep `columns` along `row`, grasping at `grasp_height`.
    pub fn new(columns: Vec<f64>, row: f64, grasp_height: f64) -> Self {
        Self {
            columns,
            row,
            grasp_height,
            next: 0,
        }
    }

    fn next_column(&mut self) -> f64 {
        let x = match self.columns.len() {
            0 => 0.5,
            len => self.columns[self.next % len],
        };
        self.next += 1;
        x
    }
}

impl Default for SweepTask {
    fn default() -> Self {
        Self::new(vec![0.2, 0.4, 0.6, 0.8], 0.5, 0.1)
    }
}

#[async_trait]
impl Task for SweepTask {
    fn name(&self) -> &str {
        "sweep"
    }

    async fn startup(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let home = [Order::move_z(1.0), Order::move_xy(0.5, 0.5), Order::gripper_open()];
        ctx.queue_orders(&home, None, false).await?;
        Ok(())
    }

    async fn perform_task(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let x = self.next_column();
        tracing::debug!(x, y = self.row, "Sweep target");
        let grasp = [
            Order::move_xy(x, self.row),
            Order::move_z(self.grasp_height),
            Order::gripper_close(),
            Order::move_z(1.0),
        ];
        ctx.queue_orders(&grasp, None, true).await?;
        Ok(())
    }

    async fn reset_task(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let release = [
            Order::move_z(self.grasp_height),
            Order::gripper_open(),
            Order::move_z(1.0),
        ];
        ctx.queue_orders(&release, None, true).await?;
        Ok(())
    }

    async fn recover_after_fail(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        // Open first: whatever is in the gripper is dropped where it is.
        let recover = [Order::gripper_open(), Order::move_z(1.0), Order::move_xy(0.5, 0.5)];
        ctx.queue_orders(&recover, None, false).await?;
        Ok(())
    }
}
