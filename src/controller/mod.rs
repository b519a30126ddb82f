//! Task controller: the drive loop around a [`Task`]'s hooks.
//!
//! One episode runs as
//!
//! ```text
//! STARTUP   startup()            error here is fatal
//! ACTIVE    perform_task()       error is contained: failed = true
//! RESETTING report outcome, wait task_time_margin,
//!           recover_after_fail() if failed, else reset_task()
//! ```
//!
//! and the loop returns to STARTUP for the next episode unless shutdown was
//! requested, the task called [`TaskContext::finish`], or `single_episode` is set.
//! Each later episode waits `timeout_between_experiments` in STARTUP before
//! `startup()` runs.
//!
//! A failed reset or recovery does not stop the run. It is reported to the
//! recorder, which flags the episode's session.
//!
//! Hook errors are contained at the loop boundary unless they carry a fatal
//! [`DaqError`] (configuration or protocol). Fatal errors move the activity to
//! FAILED where the graph allows it and are returned to the coordinator.

mod context;
pub mod registry;

pub use context::TaskContext;
pub use registry::TaskRegistry;

use crate::activity::RobotActivity;
use crate::error::{AppResult, DaqError};
use crate::recorder::{EpisodeOutcome, RecorderMessage};
use crate::shutdown::Slept;
use async_trait::async_trait;
use tracing::Instrument;

/// Hooks implemented by each task.
///
/// Only `perform_task` is required. A hook may mark the episode failed with
/// [`TaskContext::mark_failed`] or by returning an error.
#[async_trait]
pub trait Task: Send {
    /// Task identifier used in logs
    fn name(&self) -> &str;

    /// Prepare the workspace. Runs once per episode, before ACTIVE.
    async fn startup(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The task itself.
    async fn perform_task(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()>;

    /// Restore the workspace after a successful episode.
    async fn reset_task(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Restore the workspace after a failed episode.
    async fn recover_after_fail(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        self.reset_task(ctx).await
    }
}

/// How the drive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Episodes started
    pub episodes: u64,
    /// Episodes that ended with `failed` set
    pub failures: u64,
    /// Episodes whose reset or recovery hook failed
    pub reset_failures: u64,
    /// Activity when the loop returned
    pub final_state: RobotActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives one [`Task`] through its episodes.
pub struct TaskController {
    task: Box<dyn Task>,
    ctx: TaskContext,
    episodes: u64,
    failures: u64,
    reset_failures: u64,
}

impl TaskController {
    /// Controller for `task`, starting in the context's current activity.
    pub fn new(task: Box<dyn Task>, ctx: TaskContext) -> Self {
        Self {
            task,
            ctx,
            episodes: 0,
            failures: 0,
            reset_failures: 0,
        }
    }

    /// Context handed to the hooks.
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Run episodes until shutdown, finish, or the end of a single episode.
    pub async fn run(mut self) -> AppResult<RunSummary> {
        let task = self.task.name().to_string();
        tracing::info!(task = %task, "Task controller started");

        loop {
            if self.ctx.shutdown().is_set() {
                break;
            }
            if self.episodes > 0 {
                self.ctx.set_state(RobotActivity::Startup)?;
                let pause = self.ctx.settings().timeout_between_experiments();
                if !pause.is_zero() {
                    tracing::debug!("Pausing {:?} before the next episode", pause);
                    if self.ctx.sleep(pause).await == Slept::Interrupted {
                        break;
                    }
                }
            }
            self.episodes += 1;

            let span = tracing::info_span!("episode", task = %task, episode = self.ctx.episode());
            if self.run_episode().instrument(span).await? == Flow::Stop {
                break;
            }
        }

        let summary = RunSummary {
            episodes: self.episodes,
            failures: self.failures,
            reset_failures: self.reset_failures,
            final_state: self.ctx.activity(),
        };
        tracing::info!(
            episodes = summary.episodes,
            failures = summary.failures,
            reset_failures = summary.reset_failures,
            "Task controller stopped in {}",
            summary.final_state
        );
        Ok(summary)
    }

    async fn run_episode(&mut self) -> AppResult<Flow> {
        if let Err(e) = self.task.startup(&mut self.ctx).await {
            tracing::error!("startup failed: {:#}", e);
            return Err(self.escalate(e, "startup"));
        }
        if self.ctx.shutdown().is_set() {
            return Ok(Flow::Stop);
        }

        self.ctx.set_state(RobotActivity::Active)?;
        let result = self.task.perform_task(&mut self.ctx).await;
        self.contain(result, "perform_task")?;

        if self.ctx.finish_requested() {
            self.report_outcome();
            self.ctx.set_state(RobotActivity::Finished)?;
            return Ok(Flow::Stop);
        }
        if self.ctx.shutdown().is_set() {
            return Ok(Flow::Stop);
        }

        self.ctx.set_state(RobotActivity::Resetting)?;
        let failed = self.report_outcome();

        let margin = self.ctx.settings().task_time_margin();
        if self.ctx.sleep(margin).await == Slept::Interrupted {
            return Ok(Flow::Stop);
        }

        let (hook, result) = if failed {
            ("recover_after_fail", self.task.recover_after_fail(&mut self.ctx).await)
        } else {
            ("reset_task", self.task.reset_task(&mut self.ctx).await)
        };
        if self.contain(result, hook)? {
            self.reset_failures += 1;
            self.ctx.recorder().send(RecorderMessage::ResetFailed {
                episode: self.ctx.episode(),
            });
        }
        self.ctx.clear_failed();

        if self.ctx.activity().is_terminal() || self.ctx.shutdown().is_set() {
            return Ok(Flow::Stop);
        }
        if self.ctx.settings().experiment.single_episode {
            self.ctx.set_state(RobotActivity::Finished)?;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    /// Send the episode outcome to the recorder. Returns whether the episode failed.
    fn report_outcome(&mut self) -> bool {
        let failed = self.ctx.failed();
        if failed {
            self.failures += 1;
        }
        self.ctx.recorder().send(RecorderMessage::EpisodeOutcome {
            episode: self.ctx.episode(),
            outcome: if failed {
                EpisodeOutcome::Fail
            } else {
                EpisodeOutcome::Success
            },
        });
        failed
    }

    /// Contain a task-level hook error, or escalate a fatal one.
    /// Returns whether an error was contained.
    fn contain(&mut self, result: anyhow::Result<()>, hook: &'static str) -> AppResult<bool> {
        let Err(e) = result else {
            return Ok(false);
        };
        if DaqError::is_fatal_hook_error(&e) {
            tracing::error!("{} raised a fatal error: {:#}", hook, e);
            let state = self.ctx.activity();
            if state.can_transition_to(RobotActivity::Failed) {
                self.ctx.set_state(RobotActivity::Failed)?;
            }
            return Err(self.escalate(e, hook));
        }
        tracing::warn!("{} failed: {:#}", hook, e);
        self.ctx.mark_failed();
        Ok(true)
    }

    fn escalate(&self, err: anyhow::Error, hook: &'static str) -> DaqError {
        match err.downcast::<DaqError>() {
            Ok(e) => e,
            Err(e) => DaqError::Task {
                task: self.task.name().to_string(),
                hook,
                message: format!("{:#}", e),
            },
        }
    }
}
