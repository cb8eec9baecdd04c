//! Name → handler table compiled into the worker executable.
//!
//! Only a task name crosses the process boundary. The worker runtime looks
//! the name up here and runs the handler for each parameter it receives.

use super::protocol::TaskParam;
use crate::error::{PoolError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A task handler. An `Err` is reported to the pool as `failed`.
pub type TaskFn = dyn Fn(&TaskParam) -> anyhow::Result<()> + Send + Sync;

/// One registered task.
#[derive(Clone)]
pub struct TaskEntry {
    pub name: String,
    pub description: String,
    handler: Arc<TaskFn>,
}

impl TaskEntry {
    /// Run the handler on one parameter.
    pub fn run(&self, params: &TaskParam) -> anyhow::Result<()> {
        (self.handler)(params)
    }
}

impl std::fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEntry")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Registered tasks, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskEntry>,
}

/// Whether `name` can be used as a task identifier.
///
/// Names end up quoted inside the generated script, so they are limited to
/// `[A-Za-z0-9_.-]`.
pub fn is_valid_task_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    pub fn register<F>(&mut self, name: &str, description: &str, handler: F) -> Result<()>
    where
        F: Fn(&TaskParam) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !is_valid_task_name(name) {
            return Err(PoolError::Registry(format!("Invalid task name '{}'", name)));
        }
        if self.tasks.contains_key(name) {
            return Err(PoolError::Registry(format!(
                "Task '{}' is already registered",
                name
            )));
        }
        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                name: name.to_string(),
                description: description.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskEntry> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_run() {
        let mut registry = TaskRegistry::new();
        registry
            .register("double", "doubles a number", |p| {
                let n = p.value().as_i64().ok_or_else(|| anyhow::anyhow!("not a number"))?;
                anyhow::ensure!(n * 2 == 8, "unexpected value {}", n);
                Ok(())
            })
            .unwrap();

        let entry = registry.get("double").unwrap();
        assert_eq!(entry.description, "doubles a number");
        assert!(entry.run(&TaskParam::new(json!(4))).is_ok());
        assert!(entry.run(&TaskParam::new(json!("x"))).is_err());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register("a", "", |_| Ok(())).unwrap();
        let result = registry.register("a", "", |_| Ok(()));
        assert!(matches!(result, Err(PoolError::Registry(msg)) if msg.contains("already")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = TaskRegistry::new();
        assert!(registry.register("", "", |_| Ok(())).is_err());
        assert!(registry.register("it's", "", |_| Ok(())).is_err());
        assert!(registry.register("a b", "", |_| Ok(())).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register("zeta", "", |_| Ok(())).unwrap();
        registry.register("alpha", "", |_| Ok(())).unwrap();
        registry.register("mid-1.0_x", "", |_| Ok(())).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "mid-1.0_x", "zeta"]);
        assert!(registry.contains("zeta"));
        assert!(!registry.contains("omega"));
    }
}
