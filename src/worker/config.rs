//! Pool configuration.

use super::protocol::TaskParam;
use super::registry::is_valid_task_name;
use crate::error::{PoolError, Result};
use crate::paths;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-task deadline.
pub const DEFAULT_TIME_TO_CLOSE: Duration = Duration::from_secs(60);

/// Default scheduler wake-up interval.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Default interpreter for the artifact.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Configuration for a [`super::Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Registered task every worker runs.
    pub task: String,
    /// Upper bound on live workers.
    pub max_parallel: usize,
    /// How long one assignment may run before its worker is killed.
    /// `None` disables the deadline.
    pub time_to_close: Option<Duration>,
    /// Initial parameter sets, dispatched in order.
    pub task_params: Vec<TaskParam>,
    /// Shell text written verbatim at the top of the artifact.
    pub dependency: String,
    /// Directory the artifact is written to.
    pub work_dir: PathBuf,
    /// Artifact file stem. Generated from the task name when unset.
    pub artifact_name: Option<String>,
    /// Executable the bootstrap hands control to.
    pub worker_exe: Option<PathBuf>,
    /// Interpreter used to run the artifact.
    pub shell: PathBuf,
    /// Failed attempts allowed per parameter before it is abandoned.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Longest the scheduler sleeps between passes when nothing happens.
    pub tick: Duration,
}

impl PoolConfig {
    /// Defaults for running `task`.
    ///
    /// The worker executable defaults to the current executable, which must
    /// then handle the `internal-worker` subcommand.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            max_parallel: default_parallelism(),
            time_to_close: Some(DEFAULT_TIME_TO_CLOSE),
            task_params: Vec::new(),
            dependency: String::new(),
            work_dir: paths::default_work_dir(),
            artifact_name: None,
            worker_exe: std::env::current_exe().ok(),
            shell: PathBuf::from(DEFAULT_SHELL),
            max_retries: None,
            tick: DEFAULT_TICK,
        }
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn time_to_close(mut self, deadline: Option<Duration>) -> Self {
        self.time_to_close = deadline;
        self
    }

    pub fn task_params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<TaskParam>,
    {
        self.task_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn dependency(mut self, preamble: impl Into<String>) -> Self {
        self.dependency = preamble.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = Some(name.into());
        self
    }

    pub fn worker_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker_exe = Some(exe.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Check every field. Runs before any file or process is created.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(PoolError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.time_to_close.is_some_and(|d| d.is_zero()) {
            return Err(PoolError::Config(
                "time_to_close must be greater than zero".to_string(),
            ));
        }
        if self.tick.is_zero() {
            return Err(PoolError::Config(
                "tick must be greater than zero".to_string(),
            ));
        }
        if !is_valid_task_name(&self.task) {
            return Err(PoolError::Config(format!(
                "task name '{}' must be non-empty and use only [A-Za-z0-9_.-]",
                self.task
            )));
        }
        if let Some(name) = &self.artifact_name
            && !paths::is_plain_file_name(name)
        {
            return Err(PoolError::Config(format!(
                "artifact name '{}' must be a plain file name",
                name
            )));
        }
        if self.dependency.contains('\0') {
            return Err(PoolError::Config(
                "dependency preamble must not contain NUL bytes".to_string(),
            ));
        }
        match &self.worker_exe {
            None => {
                return Err(PoolError::Config(
                    "no worker executable configured".to_string(),
                ));
            }
            Some(exe) if exe.as_os_str().is_empty() => {
                return Err(PoolError::Config(
                    "worker executable path is empty".to_string(),
                ));
            }
            Some(_) => {}
        }
        if self.shell.as_os_str().is_empty() {
            return Err(PoolError::Config("shell path is empty".to_string()));
        }
        Ok(())
    }

    /// Resolve where the artifact goes.
    pub fn resolve_artifact_path(&self) -> PathBuf {
        let name = self
            .artifact_name
            .clone()
            .unwrap_or_else(|| paths::default_artifact_name(&self.task));
        paths::artifact_path(&self.work_dir, &name)
    }
}

/// Number of workers used when none is configured.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
