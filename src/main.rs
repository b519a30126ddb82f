//! grasp_daq command-line entry point.
//!
//! Runs one registered task against the simulated robot and camera until the
//! task finishes or Ctrl-C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use grasp_daq::hardware::mock::{MockCamera, MockRobot};
use grasp_daq::{Coordinator, Settings, ShutdownSignal, TaskRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grasp_daq", version, about = "Collect labelled robot manipulation episodes")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/grasp_daq.toml")]
    config: PathBuf,

    /// Task to run, overriding experiment.name
    #[arg(short, long)]
    task: Option<String>,

    /// Stop after the first episode
    #[arg(long)]
    single_episode: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// List registered tasks and exit
    #[arg(long)]
    list_tasks: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = TaskRegistry::with_builtin_tasks();
    if cli.list_tasks {
        for id in registry.list() {
            println!("{}", id);
        }
        return Ok(());
    }

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(task) = cli.task {
        settings.experiment.name = task;
    }
    if cli.single_episode {
        settings.experiment.single_episode = true;
    }
    settings.validate()?;
    init_tracing(&settings.application.log_level, cli.json);

    let task = registry.create(&settings.experiment.name)?;
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, finishing the current hook");
                    shutdown.trigger();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let coordinator = Coordinator::new(settings)?.with_shutdown(shutdown);
    let report = coordinator
        .run(
            task,
            Arc::new(MockRobot::new()),
            Arc::new(MockCamera::default()),
        )
        .await
        .context("Collection aborted")?;

    info!(
        run_id = %report.run_id,
        episodes = report.summary.episodes,
        failures = report.summary.failures,
        reset_failures = report.summary.reset_failures,
        frames = report.recorder.frames,
        "Done"
    );
    for session in &report.recorder.sessions {
        println!("{}", session.display());
    }
    Ok(())
}
