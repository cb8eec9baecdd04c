//! Process handle for worker subprocesses.
//!
//! Owns the write side of a worker's channel plus its pid. The read side is
//! handed to a collector thread at spawn time (see [`super::spawn`]).

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::ControlMessage;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{PoolError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// Handle to a worker subprocess.
pub struct Proc {
    /// Process ID
    pid: Pid,
    /// Writer for sending control messages to the worker's stdin
    writer: LineWriter,
    /// Whether the process has been reaped
    reaped: bool,
}

impl Proc {
    /// Create a new process handle from its components.
    pub fn new(pid: Pid, stdin: PipeFd) -> Self {
        Self {
            pid,
            writer: LineWriter::new(stdin),
            reaped: false,
        }
    }

    /// Split a spawned `std::process::Child` into a handle and the reader
    /// for its stdout.
    ///
    /// The `Child` itself is dropped; the process is reaped through `waitpid`.
    pub fn from_child(mut child: std::process::Child) -> Result<(Self, LineReader)> {
        let raw_pid = i32::try_from(child.id())
            .map_err(|_| PoolError::Spawn(format!("pid {} out of range", child.id())))?;
        let pid = Pid::from_raw(raw_pid);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("Child stdout not captured".into()))?;

        let reader = LineReader::new(PipeFd::new(stdout));
        Ok((Self::new(pid, PipeFd::new(stdin)), reader))
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a control message to the worker.
    pub fn send(&mut self, message: &ControlMessage) -> Result<()> {
        let line = message.to_line()?;
        self.writer
            .write_line(&line)
            .map_err(|e| PoolError::Ipc(format!("Failed to send to worker {}: {}", self.pid, e)))
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait for the process to exit (blocking).
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if self.reaped {
            return Err(PoolError::Ipc(format!("Process {} already reaped", self.pid)));
        }
        let status = waitpid(self.pid, None)
            .map_err(|e| PoolError::Ipc(format!("waitpid failed: {}", e)))?;
        self.reaped = true;
        Ok(status)
    }

    /// Try to wait for the process (non-blocking).
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if self.reaped {
            return Err(PoolError::Ipc(format!("Process {} already reaped", self.pid)));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.reaped = true;
                Ok(Some(status))
            }
            Err(e) => {
                self.reaped = true;
                Err(PoolError::Ipc(format!("waitpid failed: {}", e)))
            }
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| PoolError::Ipc(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL to the process and wait for it to exit.
    pub fn kill(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| PoolError::Ipc(format!("Failed to send SIGKILL: {}", e)))?;
        self.wait()?;
        Ok(())
    }

    /// Gracefully stop the worker: send exit, wait briefly, then escalate.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.reaped {
            return Ok(());
        }

        let _ = self.send(&ControlMessage::Exit);

        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => std::thread::sleep(Duration::from_millis(5)),
                Err(_) => return Ok(()),
            }
        }

        let _ = self.terminate();
        std::thread::sleep(Duration::from_millis(20));
        if let Ok(Some(_)) = self.try_wait() {
            return Ok(());
        }

        self.kill()
    }

    /// Collect the exit status of a worker whose channel has closed.
    ///
    /// A process that closed stdout but is still alive can no longer
    /// report, so it is killed.
    pub fn reap(&mut self) -> TerminationReason {
        if self.reaped {
            return TerminationReason::Unknown;
        }

        // The channel closes just before the process exits; allow it to finish.
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(50) {
            match self.try_wait() {
                Ok(Some(status)) => return analyze_wait_status(status),
                Ok(None) => std::thread::sleep(Duration::from_millis(2)),
                Err(_) => return TerminationReason::Unknown,
            }
        }

        let _ = signal::kill(self.pid, Signal::SIGKILL);
        match self.wait() {
            Ok(status) => analyze_wait_status(status),
            Err(_) => TerminationReason::Unknown,
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.terminate();
            std::thread::sleep(Duration::from_millis(10));

            if let Ok(Some(_)) = self.try_wait() {
                return;
            }

            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.reaped = true;
        }
    }
}
