//! Exit analysis for worker processes that stop without reporting.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Exit code a worker uses when its task name is not in the registry.
pub const EXIT_UNKNOWN_TASK: i32 = 3;

/// Exit code a worker uses when its argv could not be parsed.
pub const EXIT_BAD_ARGS: i32 = 2;

/// Exit code the bootstrap script uses when no worker executable is set.
pub const EXIT_NO_WORKER_EXE: i32 = 70;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// Status could not be determined (already reaped elsewhere).
    Unknown,
}

impl TerminationReason {
    /// Whether a replacement worker can be expected to do better.
    ///
    /// Bootstrap failures repeat on every spawn, so they stop the pool.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Exited(EXIT_UNKNOWN_TASK | EXIT_BAD_ARGS | EXIT_NO_WORKER_EXE)
        )
    }

    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(EXIT_UNKNOWN_TASK) => {
                format!("exited with code {} (unknown task)", EXIT_UNKNOWN_TASK)
            }
            Self::Exited(EXIT_BAD_ARGS) => {
                format!("exited with code {} (bad worker arguments)", EXIT_BAD_ARGS)
            }
            Self::Exited(EXIT_NO_WORKER_EXE) => format!(
                "exited with code {} (PROCPOOL_WORKER_EXE not set)",
                EXIT_NO_WORKER_EXE
            ),
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(Signal::SIGKILL) => "killed by SIGKILL".to_string(),
            Self::Signaled(Signal::SIGSEGV) => "crashed (SIGSEGV)".to_string(),
            Self::Signaled(Signal::SIGABRT) => "aborted (SIGABRT)".to_string(),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
