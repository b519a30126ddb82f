//! Configuration loaded with Figment.
//!
//! Configuration is read from a TOML file and then overridden by environment
//! variables prefixed with `GRASPDAQ_` (nested keys separated by `__`):
//!
//! ```text
//! GRASPDAQ_CAMERA__FPS=5
//! GRASPDAQ_EXPERIMENT__SINGLE_EPISODE=true
//! GRASPDAQ_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! Every field is read once when the coordinator is constructed. Missing or
//! invalid values surface as [`DaqError::Configuration`] from [`Settings::validate`]
//! rather than failing later at lookup time.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Camera and recording settings
    pub camera: CameraConfig,
    /// Task and output settings
    pub experiment: ExperimentConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Whether anything is written to disk
    pub record: bool,
    /// Recorder tick rate in frames per second
    pub fps: f64,
    /// Persist frames only when the task pushes a capture after an order
    #[serde(default)]
    pub record_only_after_action: bool,
    /// Save frames as individual images instead of clip files
    #[serde(default)]
    pub save_images_individually: bool,
    /// Maximum number of frames per clip file
    #[serde(default)]
    pub clip_length: Option<u32>,
}

/// Task and output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Task identifier, also the name of the experiment directory
    pub name: String,
    /// Robot identifier handed to the driver
    #[serde(default = "default_robot_idx")]
    pub robot_idx: String,
    /// Delay after each order, in seconds
    pub time_between_orders: f64,
    /// Settling delay on entering RESETTING, in seconds
    #[serde(default = "default_task_time_margin")]
    pub task_time_margin: f64,
    /// Pause before each episode after the first, in seconds. The recorder
    /// does not sample on its timer while paused.
    #[serde(default)]
    pub timeout_between_experiments: f64,
    /// Root directory for recorded sessions
    pub output_dir: PathBuf,
    /// Stop after the first episode instead of looping
    #[serde(default)]
    pub single_episode: bool,
}

fn default_app_name() -> String {
    "grasp_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_robot_idx() -> String {
    "robot1".to_string()
}

fn default_task_time_margin() -> f64 {
    2.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            record: true,
            fps: 5.0,
            record_only_after_action: false,
            save_images_individually: false,
            clip_length: None,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "sweep".to_string(),
            robot_idx: default_robot_idx(),
            time_between_orders: 1.0,
            task_time_margin: default_task_time_margin(),
            timeout_between_experiments: 0.0,
            output_dir: PathBuf::from("recorded_data"),
            single_episode: false,
        }
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from a TOML file and `GRASPDAQ_` environment variables.
    ///
    /// The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DaqError::Configuration(format!(
                "Configuration file '{}' does not exist",
                path.display()
            )));
        }
        Self::from_figment(Figment::new().merge(Toml::file(path)))
    }

    /// Extract and validate settings from an already assembled figment.
    ///
    /// Environment overrides are merged on top of whatever `figment` provides.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let settings: Self = figment
            .merge(Env::prefixed("GRASPDAQ_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Figment seeded with the built-in defaults, for layering partial files on top.
    pub fn default_figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Log level is one of trace, debug, info, warn, error
    /// - FPS is finite and positive
    /// - Clip length, when set, is positive
    /// - Delays are finite and non-negative
    /// - Task identifier and output directory are non-empty
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !self.camera.fps.is_finite() || self.camera.fps <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid camera.fps {}. Must be a positive number",
                self.camera.fps
            )));
        }

        if self.camera.clip_length == Some(0) {
            return Err(DaqError::Configuration(
                "camera.clip_length must be > 0 when set".to_string(),
            ));
        }

        for (key, value) in [
            ("experiment.time_between_orders", self.experiment.time_between_orders),
            ("experiment.task_time_margin", self.experiment.task_time_margin),
            (
                "experiment.timeout_between_experiments",
                self.experiment.timeout_between_experiments,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DaqError::Configuration(format!(
                    "Invalid {} {}. Must be a non-negative number of seconds",
                    key, value
                )));
            }
        }

        if self.experiment.name.trim().is_empty() {
            return Err(DaqError::Configuration(
                "experiment.name (task identifier) cannot be empty".to_string(),
            ));
        }

        if self.experiment.output_dir.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "experiment.output_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Recorder tick period derived from `camera.fps`.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.camera.fps)
    }

    /// Default inter-order delay.
    pub fn time_between_orders(&self) -> Duration {
        Duration::from_secs_f64(self.experiment.time_between_orders)
    }

    /// Settling delay before reset or recovery.
    pub fn task_time_margin(&self) -> Duration {
        Duration::from_secs_f64(self.experiment.task_time_margin)
    }

    /// Pause between episodes.
    pub fn timeout_between_experiments(&self) -> Duration {
        Duration::from_secs_f64(self.experiment.timeout_between_experiments)
    }

    /// Directory holding every session of the configured task.
    pub fn experiment_dir(&self) -> PathBuf {
        self.experiment.output_dir.join(&self.experiment.name)
    }
}
