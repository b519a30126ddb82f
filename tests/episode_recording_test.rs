//! End-to-end collection runs with the simulated robot and camera.

use async_trait::async_trait;
use grasp_daq::dataset::RecordedSession;
use grasp_daq::hardware::mock::{MockCamera, MockRobot};
use grasp_daq::observation::CameraView;
use grasp_daq::recorder::EpisodeOutcome;
use grasp_daq::session::RecordingPhase;
use grasp_daq::{Coordinator, Order, RobotActivity, Settings, Task, TaskContext};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

/// Three recorded orders per episode; fails the listed episodes, finishes on `last`.
struct ThreeOrders {
    fail_on: Vec<u64>,
    last: Option<u64>,
}

#[async_trait]
impl Task for ThreeOrders {
    fn name(&self) -> &str {
        "three_orders"
    }

    async fn perform_task(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let orders = [
            Order::move_xy(0.3, 0.7),
            Order::move_z(0.1),
            Order::gripper_close(),
        ];
        ctx.queue_orders(&orders, None, true).await?;

        let episode = ctx.episode();
        if self.fail_on.contains(&episode) {
            anyhow::bail!("nothing in the gripper after episode {}", episode);
        }
        if self.last == Some(episode) {
            ctx.finish()?;
        }
        Ok(())
    }
}

fn settings(output: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.camera.fps = 2.0;
    settings.camera.record_only_after_action = true;
    settings.experiment.name = "three_orders".into();
    settings.experiment.output_dir = output.to_path_buf();
    settings.experiment.time_between_orders = 1.5;
    settings.experiment.task_time_margin = 0.5;
    settings
}

async fn run(settings: Settings, task: ThreeOrders) -> grasp_daq::RunReport {
    Coordinator::new(settings)
        .unwrap()
        .run(
            Box::new(task),
            Arc::new(MockRobot::with_latency(Duration::from_millis(5))),
            Arc::new(MockCamera::new(16, 12)),
        )
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_after_action_records_exactly_one_observation_per_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut settings = settings(temp_dir.path());
    settings.experiment.single_episode = true;

    let report = run(
        settings,
        ThreeOrders {
            fail_on: vec![],
            last: None,
        },
    )
    .await;

    assert_eq!(report.summary.episodes, 1);
    assert_eq!(report.summary.final_state, RobotActivity::Finished);
    assert_eq!(report.recorder.frames, 3);
    // At 2 fps over several seconds the recorder ticked far more often than it wrote.
    assert!(report.recorder.ticks > 3);

    let session = RecordedSession::load(&report.recorder.sessions[0]).unwrap();
    let task = session.task();
    assert_eq!(session.status, Some(EpisodeOutcome::Success));
    assert_eq!(task.telemetry.len(), 3);
    assert!(session.restore().telemetry.is_empty());
    assert_eq!(session.orders.len(), 3);
    assert!(session.orders.iter().all(|o| o.finished_at >= o.started_at));
    assert_eq!(session.metadata.frames, 3);
    assert_eq!(task.frames(CameraView::Top).unwrap().len(), 3);
    assert_eq!(task.frames(CameraView::Bottom).unwrap().len(), 3);

    let stamped: Vec<Option<Order>> = task.telemetry.iter().map(|r| r.order.clone()).collect();
    assert_eq!(
        stamped,
        vec![
            Some(Order::move_xy(0.3, 0.7)),
            Some(Order::move_z(0.1)),
            Some(Order::gripper_close())
        ]
    );
    assert_eq!(task.telemetry[2].telemetry.claw, 0.0);
    assert!(task
        .telemetry
        .iter()
        .all(|r| r.activity == RobotActivity::Active && r.episode == 1));
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_episodes_get_distinct_sessions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let settings = settings(temp_dir.path());
    let experiment = settings.experiment_dir();
    std::fs::create_dir_all(experiment.join("1")).unwrap();

    let report = run(
        settings,
        ThreeOrders {
            fail_on: vec![],
            last: Some(2),
        },
    )
    .await;

    assert_eq!(report.summary.episodes, 2);
    assert_eq!(
        report.recorder.sessions,
        vec![experiment.join("2"), experiment.join("3")]
    );

    let sessions = RecordedSession::load_all(&experiment).unwrap();
    assert_eq!(sessions.len(), 2);
    for (episode, session) in (1..).zip(&sessions) {
        assert_eq!(session.metadata.episode, episode);
        assert_eq!(session.metadata.run_id, report.run_id);
        assert_eq!(session.task().telemetry.len(), 3);
        assert!(session.telemetry().all(|r| r.episode == episode));
        assert_eq!(session.status, Some(EpisodeOutcome::Success));
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_failed_episode_is_contained_and_collection_continues() {
    let temp_dir = tempfile::tempdir().unwrap();
    let report = run(
        settings(temp_dir.path()),
        ThreeOrders {
            fail_on: vec![1],
            last: Some(2),
        },
    )
    .await;

    assert_eq!(report.summary.episodes, 2);
    assert_eq!(report.summary.failures, 1);
    assert_eq!(report.summary.final_state, RobotActivity::Finished);

    let first = RecordedSession::load(&report.recorder.sessions[0]).unwrap();
    let second = RecordedSession::load(&report.recorder.sessions[1]).unwrap();
    assert_eq!(first.status, Some(EpisodeOutcome::Fail));
    assert_eq!(second.status, Some(EpisodeOutcome::Success));
    assert!(logs_contain("perform_task failed"));
    assert!(logs_contain("nothing in the gripper after episode 1"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_mode_records_while_task_runs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut settings = settings(temp_dir.path());
    settings.camera.record_only_after_action = false;
    settings.camera.clip_length = Some(4);
    settings.experiment.single_episode = true;

    let report = run(
        settings,
        ThreeOrders {
            fail_on: vec![],
            last: None,
        },
    )
    .await;

    // 3 orders at 1.5 s plus a 0.5 s margin, sampled at 2 fps.
    assert!(report.recorder.frames >= 8, "frames {}", report.recorder.frames);
    let session = RecordedSession::load(&report.recorder.sessions[0]).unwrap();
    assert_eq!(session.telemetry().count() as u64, report.recorder.frames);
    assert!(session.task().clips(CameraView::Top).len() >= 2);
    assert!(session.telemetry().all(|r| r.order.is_none()));
    let top = session.task().frames(CameraView::Top).unwrap().len()
        + session.restore().frames(CameraView::Top).unwrap().len();
    assert_eq!(top as u64, report.recorder.frames);
}

#[tokio::test(start_paused = true)]
async fn test_reset_footage_lands_in_restore() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut settings = settings(temp_dir.path());
    settings.camera.record_only_after_action = false;
    settings.experiment.task_time_margin = 2.0;
    settings.experiment.single_episode = true;

    let report = run(
        settings,
        ThreeOrders {
            fail_on: vec![],
            last: None,
        },
    )
    .await;

    let session = RecordedSession::load(&report.recorder.sessions[0]).unwrap();
    let restore = session.phase(RecordingPhase::Restore);
    assert!(restore.telemetry.len() >= 3, "restore rows {}", restore.telemetry.len());
    assert!(restore
        .telemetry
        .iter()
        .all(|r| r.activity == RobotActivity::Resetting && r.phase == RecordingPhase::Restore));
    assert!(session
        .task()
        .telemetry
        .iter()
        .all(|r| r.activity != RobotActivity::Resetting));
    assert_eq!(
        restore.frames(CameraView::Bottom).unwrap().len(),
        restore.telemetry.len()
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_between_episodes_is_not_sampled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut settings = settings(temp_dir.path());
    settings.camera.record_only_after_action = false;
    settings.experiment.timeout_between_experiments = 10.0;

    let report = run(
        settings,
        ThreeOrders {
            fail_on: vec![],
            last: Some(2),
        },
    )
    .await;

    assert_eq!(report.summary.episodes, 2);
    // 10 s at 2 fps, give or take the tick the session opened on
    assert!(report.recorder.paused >= 19, "paused {}", report.recorder.paused);
    let second = RecordedSession::load(&report.recorder.sessions[1]).unwrap();
    let startup = second
        .task()
        .telemetry
        .iter()
        .filter(|r| r.activity == RobotActivity::Startup)
        .count();
    assert!(startup <= 1, "startup rows {}", startup);
}
