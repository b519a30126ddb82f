//! Task lookup by identifier.

use crate::controller::Task;
use crate::error::{AppResult, DaqError};
use crate::tasks::{CalibrateTask, SweepTask};
use std::collections::HashMap;

type TaskFactory = Box<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Maps task identifiers (`experiment.name`) to task constructors.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `sweep` and `calibrate` tasks.
    pub fn with_builtin_tasks() -> Self {
        let mut registry = Self::new();
        registry.register("sweep", || Box::new(SweepTask::default()));
        registry.register("calibrate", || Box::new(CalibrateTask::default()));
        registry
    }

    /// Register `factory` under `id`, replacing any previous entry.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
    }

    /// Build the task registered under `id`. Unknown ids are configuration errors.
    pub fn create(&self, id: &str) -> AppResult<Box<dyn Task>> {
        self.factories.get(id).map(|factory| factory()).ok_or_else(|| {
            DaqError::Configuration(format!(
                "Unknown task '{}'. Registered tasks: {}",
                id,
                self.list().join(", ")
            ))
        })
    }

    /// Registered identifiers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tasks() {
        let registry = TaskRegistry::with_builtin_tasks();
        assert_eq!(registry.list(), vec!["calibrate", "sweep"]);
        assert_eq!(registry.create("sweep").unwrap().name(), "sweep");
    }

    #[test]
    fn test_unknown_task_is_configuration_error() {
        let err = TaskRegistry::with_builtin_tasks().create("stack").err().unwrap();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(err.to_string().contains("calibrate, sweep"));
    }
}
