//! Primitive robot orders and their sequential execution.
//!
//! An [`Order`] is one robot command with its parameters, validated and clipped
//! when it is built and immutable afterwards. [`OrderExecutor::queue_orders`] runs
//! a list of orders strictly in sequence, sleeping between orders through the
//! shutdown signal. An interrupted sleep abandons the rest of the queue; that is
//! reported as [`QueueOutcome::Aborted`], not as an error.

use crate::error::{AppResult, DaqError};
use crate::hardware::RobotDriver;
use crate::shutdown::{ShutdownSignal, Slept};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Kind of primitive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Move in the horizontal plane: `[x, y]`
    MoveXy,
    /// Move to a height: `[z]`
    MoveZ,
    /// Rotate the wrist by degrees: `[deg]`
    Rotate,
    /// Open the gripper fully: `[]`
    GripperOpen,
    /// Close the gripper, or move it to an opening: `[]` or `[opening]`
    GripperClose,
}

impl OrderKind {
    /// Wire name, e.g. `MOVE_XY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::MoveXy => "MOVE_XY",
            OrderKind::MoveZ => "MOVE_Z",
            OrderKind::Rotate => "ROTATE",
            OrderKind::GripperOpen => "GRIPPER_OPEN",
            OrderKind::GripperClose => "GRIPPER_CLOSE",
        }
    }

    fn accepts_arity(&self, count: usize) -> bool {
        match self {
            OrderKind::MoveXy => count == 2,
            OrderKind::MoveZ | OrderKind::Rotate => count == 1,
            OrderKind::GripperOpen => count == 0,
            OrderKind::GripperClose => count <= 1,
        }
    }

    /// Normalized workspace coordinates are clipped to [0, 1]; angles are not.
    fn clip(&self, params: Vec<f64>) -> Vec<f64> {
        match self {
            OrderKind::Rotate => params,
            _ => params.into_iter().map(|p| p.clamp(0.0, 1.0)).collect(),
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MOVE_XY" => Ok(OrderKind::MoveXy),
            "MOVE_Z" => Ok(OrderKind::MoveZ),
            "ROTATE" => Ok(OrderKind::Rotate),
            "GRIPPER_OPEN" => Ok(OrderKind::GripperOpen),
            "GRIPPER_CLOSE" => Ok(OrderKind::GripperClose),
            other => Err(DaqError::Configuration(format!("Unknown order kind '{}'", other))),
        }
    }
}

/// One primitive robot command.
///
/// Deserialization goes through [`Order::new`], so an order read from a log or
/// from external JSON is held to the same rules as one built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOrder")]
pub struct Order {
    kind: OrderKind,
    params: Vec<f64>,
}

/// Unchecked wire form of an [`Order`].
#[derive(Deserialize)]
struct RawOrder {
    kind: OrderKind,
    #[serde(default)]
    params: Vec<f64>,
}

impl TryFrom<RawOrder> for Order {
    type Error = DaqError;

    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        Order::new(raw.kind, raw.params)
    }
}

impl Order {
    /// Build an order, checking the parameter count for its kind.
    ///
    /// Parameters of every kind except ROTATE are clipped to [0, 1].
    pub fn new(kind: OrderKind, params: Vec<f64>) -> AppResult<Self> {
        if !kind.accepts_arity(params.len()) {
            return Err(DaqError::Configuration(format!(
                "{} does not take {} parameter(s)",
                kind,
                params.len()
            )));
        }
        if let Some(bad) = params.iter().find(|p| !p.is_finite()) {
            return Err(DaqError::Configuration(format!(
                "{} parameter {} is not a finite number",
                kind, bad
            )));
        }
        Ok(Self {
            kind,
            params: kind.clip(params),
        })
    }

    /// Move in the plane. Non-finite coordinates fall back to 0.
    pub fn move_xy(x: f64, y: f64) -> Self {
        Self::known(OrderKind::MoveXy, vec![x, y])
    }

    /// Move to height `z`.
    pub fn move_z(z: f64) -> Self {
        Self::known(OrderKind::MoveZ, vec![z])
    }

    /// Rotate the wrist by `degrees`.
    pub fn rotate(degrees: f64) -> Self {
        Self::known(OrderKind::Rotate, vec![degrees])
    }

    /// Open the gripper fully.
    pub fn gripper_open() -> Self {
        Self::known(OrderKind::GripperOpen, Vec::new())
    }

    /// Close the gripper fully.
    pub fn gripper_close() -> Self {
        Self::known(OrderKind::GripperClose, Vec::new())
    }

    /// Arity is correct by construction here; only the values need cleaning.
    fn known(kind: OrderKind, params: Vec<f64>) -> Self {
        let params = params
            .into_iter()
            .map(|p| if p.is_finite() { p } else { 0.0 })
            .collect();
        Self {
            kind,
            params: kind.clip(params),
        }
    }

    /// Command kind.
    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    /// Parameters after clipping.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    /// Parameter `index`, or a configuration error if the order lacks it.
    fn param(&self, index: usize) -> AppResult<f64> {
        self.params.get(index).copied().ok_or_else(|| {
            DaqError::Configuration(format!("{} is missing parameter {}", self, index))
        })
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.kind, self.params)
    }
}

impl FromStr for Order {
    type Err = DaqError;

    /// Parses `"MOVE_XY 0.2 0.8"`-style text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let kind: OrderKind = tokens
            .next()
            .ok_or_else(|| DaqError::Configuration("Empty order".to_string()))?
            .parse()?;
        let params = tokens
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    DaqError::Configuration(format!("Invalid parameter '{}' for {}", t, kind))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Order::new(kind, params)
    }
}

/// An order that reached the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// The order as sent
    pub order: Order,
    /// When the command was sent to the robot
    pub started_at: DateTime<Utc>,
    /// When the robot acknowledged it
    pub finished_at: DateTime<Utc>,
}

/// How a queue ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Every order ran.
    Completed {
        /// Orders sent to the robot
        executed: usize,
    },
    /// Shutdown interrupted the queue after `executed` orders.
    Aborted {
        /// Orders sent to the robot before the interruption
        executed: usize,
    },
}

impl QueueOutcome {
    /// Whether the whole queue ran.
    pub fn is_completed(&self) -> bool {
        matches!(self, QueueOutcome::Completed { .. })
    }

    /// Orders that reached the robot.
    pub fn executed(&self) -> usize {
        match self {
            QueueOutcome::Completed { executed } | QueueOutcome::Aborted { executed } => *executed,
        }
    }
}

/// Hooks invoked as a queue progresses.
pub trait OrderListener: Send {
    /// The robot accepted the order.
    fn order_executed(&mut self, _record: &OrderRecord) {}
    /// The inter-order delay after the order elapsed without interruption.
    fn order_settled(&mut self, _record: &OrderRecord) {}
}

impl OrderListener for () {}

/// Runs orders against a robot driver.
#[derive(Clone)]
pub struct OrderExecutor {
    driver: Arc<dyn RobotDriver>,
    shutdown: ShutdownSignal,
    default_delay: Duration,
}

impl OrderExecutor {
    /// An executor sleeping `default_delay` after each order unless told otherwise.
    pub fn new(driver: Arc<dyn RobotDriver>, shutdown: ShutdownSignal, default_delay: Duration) -> Self {
        Self {
            driver,
            shutdown,
            default_delay,
        }
    }

    /// Delay used when a queue does not give its own.
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Send one order to the robot. Driver failures become [`DaqError::Driver`].
    pub async fn execute(&self, order: &Order) -> AppResult<OrderRecord> {
        let started_at = Utc::now();
        let result = match order.kind() {
            OrderKind::MoveXy => self.driver.move_xy(order.param(0)?, order.param(1)?).await,
            OrderKind::MoveZ => self.driver.move_z(order.param(0)?).await,
            OrderKind::Rotate => self.driver.rotate(order.param(0)?).await,
            OrderKind::GripperOpen => self.driver.gripper_open().await,
            OrderKind::GripperClose => match order.params().first() {
                Some(opening) => self.driver.move_gripper(*opening).await,
                None => self.driver.gripper_close().await,
            },
        };
        result.map_err(|e| DaqError::Driver(format!("{} failed: {:#}", order, e)))?;

        Ok(OrderRecord {
            order: order.clone(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Execute `orders` in sequence with `delay` (or the default) after each one.
    ///
    /// The shutdown signal is checked before every order, including for an empty
    /// queue. A driver error stops the queue and is returned as-is.
    pub async fn queue_orders<L: OrderListener>(
        &self,
        orders: &[Order],
        delay: Option<Duration>,
        listener: &mut L,
    ) -> AppResult<QueueOutcome> {
        let delay = delay.unwrap_or(self.default_delay);

        for (index, order) in orders.iter().enumerate() {
            if self.shutdown.is_set() {
                tracing::info!("Order queue aborted before {} ({} of {})", order, index + 1, orders.len());
                return Ok(QueueOutcome::Aborted { executed: index });
            }

            let record = self.execute(order).await?;
            listener.order_executed(&record);

            if self.shutdown.sleep(delay).await == Slept::Interrupted {
                tracing::info!("Order queue aborted after {} ({} of {})", order, index + 1, orders.len());
                return Ok(QueueOutcome::Aborted { executed: index + 1 });
            }
            listener.order_settled(&record);
        }

        Ok(QueueOutcome::Completed {
            executed: orders.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockRobot;

    fn executor(robot: &MockRobot, shutdown: &ShutdownSignal) -> OrderExecutor {
        OrderExecutor::new(
            Arc::new(robot.clone()),
            shutdown.clone(),
            Duration::from_millis(50),
        )
    }

    fn five_orders() -> Vec<Order> {
        vec![
            Order::move_z(1.0),
            Order::move_xy(0.2, 0.2),
            Order::move_z(0.1),
            Order::gripper_close(),
            Order::move_z(1.0),
        ]
    }

    #[test]
    fn test_order_validation() {
        assert!(Order::new(OrderKind::MoveXy, vec![0.1]).is_err());
        assert!(Order::new(OrderKind::GripperOpen, vec![0.1]).is_err());
        assert!(Order::new(OrderKind::MoveZ, vec![f64::NAN]).is_err());
        assert!(Order::new(OrderKind::GripperClose, vec![]).is_ok());
        assert!(Order::new(OrderKind::GripperClose, vec![0.3]).is_ok());

        let clipped = Order::new(OrderKind::MoveXy, vec![-0.5, 1.7]).unwrap();
        assert_eq!(clipped.params(), &[0.0, 1.0]);
        let rotation = Order::new(OrderKind::Rotate, vec![270.0]).unwrap();
        assert_eq!(rotation.params(), &[270.0]);
    }

    #[test]
    fn test_unknown_kind_is_configuration_error() {
        let err = "MOVE_W".parse::<OrderKind>().unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(err.is_fatal());

        let order: Order = "move_xy 0.25 0.75".parse().unwrap();
        assert_eq!(order, Order::move_xy(0.25, 0.75));
        assert!("MOVE_Z high".parse::<Order>().is_err());
        assert!("".parse::<Order>().is_err());
    }

    #[test]
    fn test_order_serialization() {
        let json = serde_json::to_string(&Order::move_z(0.5)).unwrap();
        assert_eq!(json, r#"{"kind":"MOVE_Z","params":[0.5]}"#);
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Order::move_z(0.5));
    }

    #[test]
    fn test_deserialization_applies_order_rules() {
        assert!(serde_json::from_str::<Order>(r#"{"kind":"MOVE_XY","params":[]}"#).is_err());
        assert!(serde_json::from_str::<Order>(r#"{"kind":"GRIPPER_OPEN","params":[1.0]}"#).is_err());
        assert!(serde_json::from_str::<Order>(r#"{"kind":"MOVE_Z"}"#).is_err());

        let clipped: Order = serde_json::from_str(r#"{"kind":"MOVE_XY","params":[-3.0, 0.5]}"#).unwrap();
        assert_eq!(clipped.params(), &[0.0, 0.5]);
        let open: Order = serde_json::from_str(r#"{"kind":"GRIPPER_OPEN"}"#).unwrap();
        assert_eq!(open, Order::gripper_open());
    }

    #[test]
    fn test_shortcuts_follow_the_same_rules() {
        assert_eq!(Order::move_xy(1.5, -2.0), Order::new(OrderKind::MoveXy, vec![1.0, 0.0]).unwrap());
        assert_eq!(Order::move_z(f64::NAN).params(), &[0.0]);
        assert_eq!(Order::rotate(-90.0).params(), &[-90.0]);
        assert_eq!(Order::gripper_close(), Order::new(OrderKind::GripperClose, vec![]).unwrap());
        for order in [Order::rotate(45.0), Order::gripper_open(), Order::gripper_close()] {
            assert_eq!(Order::new(order.kind(), order.params().to_vec()).unwrap(), order);
        }
    }

    #[tokio::test]
    async fn test_order_from_json_executes_without_panicking() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        let shutdown = ShutdownSignal::new();
        let order: Order = serde_json::from_str(r#"{"kind":"MOVE_XY","params":[0.4,0.6]}"#).unwrap();

        executor(&robot, &shutdown).execute(&order).await.unwrap();
        assert_eq!(robot.commands().await, vec!["move_xy(0.40, 0.60)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_in_sequence() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        let shutdown = ShutdownSignal::new();

        let outcome = executor(&robot, &shutdown)
            .queue_orders(&five_orders(), None, &mut ())
            .await
            .unwrap();

        assert_eq!(outcome, QueueOutcome::Completed { executed: 5 });
        assert_eq!(
            robot.commands().await,
            vec![
                "move_z(1.00)",
                "move_xy(0.20, 0.20)",
                "move_z(0.10)",
                "gripper_close",
                "move_z(1.00)"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_queue_completes_even_after_shutdown() {
        let robot = MockRobot::new();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let outcome = executor(&robot, &shutdown)
            .queue_orders(&[], None, &mut ())
            .await
            .unwrap();
        assert_eq!(outcome, QueueOutcome::Completed { executed: 0 });
    }

    struct TriggerAfter {
        shutdown: ShutdownSignal,
        after: usize,
        executed: usize,
        settled: usize,
    }

    impl OrderListener for TriggerAfter {
        fn order_executed(&mut self, _record: &OrderRecord) {
            self.executed += 1;
            if self.executed == self.after {
                self.shutdown.trigger();
            }
        }

        fn order_settled(&mut self, _record: &OrderRecord) {
            self.settled += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_queue_aborts_remaining_orders() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        let shutdown = ShutdownSignal::new();
        let mut listener = TriggerAfter {
            shutdown: shutdown.clone(),
            after: 2,
            executed: 0,
            settled: 0,
        };

        let outcome = executor(&robot, &shutdown)
            .queue_orders(&five_orders(), Some(Duration::from_secs(10)), &mut listener)
            .await
            .unwrap();

        assert_eq!(outcome, QueueOutcome::Aborted { executed: 2 });
        assert!(!outcome.is_completed());
        assert_eq!(robot.commands().await.len(), 2);
        assert_eq!(listener.settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_error_stops_queue() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        let shutdown = ShutdownSignal::new();
        let exec = executor(&robot, &shutdown);

        exec.execute(&Order::move_z(0.5)).await.unwrap();
        robot.fail_next(1).await;

        let err = exec
            .queue_orders(&five_orders(), None, &mut ())
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Driver(_)));
        assert!(!err.is_fatal());
        assert_eq!(robot.commands().await.len(), 1);
    }

    #[tokio::test]
    async fn test_gripper_close_with_opening() {
        let robot = MockRobot::with_latency(Duration::ZERO);
        let shutdown = ShutdownSignal::new();
        let order = Order::new(OrderKind::GripperClose, vec![0.24]).unwrap();

        let record = executor(&robot, &shutdown).execute(&order).await.unwrap();
        assert_eq!(record.order, order);
        assert!(record.finished_at >= record.started_at);
        assert_eq!(robot.commands().await, vec!["move_gripper(0.24)"]);
    }
}
