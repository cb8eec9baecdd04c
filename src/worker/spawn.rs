//! Worker subprocess spawning.
//!
//! The pool never creates processes directly; it goes through a [`Spawner`]
//! so scheduling can be exercised without real processes. [`ProcessSpawner`]
//! is the production implementation: it runs the generated artifact under a
//! shell and forwards everything the worker writes on stdout to the pool's
//! event queue from a dedicated collector thread.

use super::event::{EventSender, PoolEvent};
use super::ipc::LineReader;
use super::lifecycle::WorkerId;
use super::proc::Proc;
use super::protocol::{ControlMessage, TaskParam, WorkerSignal};
use super::signals::TerminationReason;
use crate::error::{PoolError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Environment variable the bootstrap template reads to find the worker executable.
pub const WORKER_EXE_ENV: &str = "PROCPOOL_WORKER_EXE";

/// Stack size for collector threads. They only parse short token lines.
const COLLECTOR_STACK_SIZE: usize = 256 * 1024;

/// How long an idle worker gets to honour an exit request before escalation.
const STOP_GRACE: Duration = Duration::from_millis(200);

/// Everything a spawner needs to start one worker.
pub struct SpawnRequest<'a> {
    /// Generated entry-point script.
    pub artifact: &'a Path,
    /// Parameter for the worker's first task, passed as argv.
    pub initial: &'a TaskParam,
    /// Where the worker's channel messages must be delivered.
    pub events: &'a EventSender,
}

/// Creates worker processes.
pub trait Spawner: Send {
    /// Start a worker already running `request.initial`.
    fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Box<dyn WorkerHandle>>;
}

/// Exclusive handle on one running worker and its channel.
pub trait WorkerHandle: Send {
    /// Stable identity (the OS pid for real processes).
    fn id(&self) -> WorkerId;

    /// Write a control message to the worker.
    fn send(&mut self, message: &ControlMessage) -> Result<()>;

    /// Ask the worker to exit, escalating to signals if it does not.
    fn stop(&mut self);

    /// Kill the worker immediately.
    fn kill(&mut self);

    /// Collect the exit reason after the worker's channel closed.
    fn reap(&mut self) -> TerminationReason;
}

/// Spawns real OS processes running the generated artifact.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    /// Interpreter for the artifact.
    shell: PathBuf,
    /// Executable the bootstrap hands control to.
    worker_exe: PathBuf,
}

impl ProcessSpawner {
    /// Create a spawner running artifacts with `shell` and bootstrapping into `worker_exe`.
    pub fn new(shell: impl Into<PathBuf>, worker_exe: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            worker_exe: worker_exe.into(),
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&mut self, request: SpawnRequest<'_>) -> Result<Box<dyn WorkerHandle>> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(request.artifact);
        cmd.arg(request.initial.to_arg());
        cmd.env(WORKER_EXE_ENV, &self.worker_exe);

        // stdin/stdout are the channel; stderr carries worker logs.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            PoolError::Spawn(format!(
                "{} {}: {}",
                self.shell.display(),
                request.artifact.display(),
                e
            ))
        })?;

        let (mut proc, reader) = Proc::from_child(child)?;
        let id = WorkerId::from(proc.pid());

        let events = request.events.clone();
        if let Err(e) = spawn_collector_thread(&format!("procpool-collector-{}", id), move || {
            collect(id, reader, events)
        }) {
            let _ = proc.kill();
            return Err(PoolError::Spawn(format!(
                "Failed to start collector for worker {}: {}",
                id, e
            )));
        }

        tracing::trace!(worker = %id, artifact = %request.artifact.display(), "Spawned worker process");
        Ok(Box::new(ProcessWorker { id, proc }))
    }
}

/// A real worker process.
struct ProcessWorker {
    id: WorkerId,
    proc: Proc,
}

impl WorkerHandle for ProcessWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn send(&mut self, message: &ControlMessage) -> Result<()> {
        self.proc.send(message)
    }

    fn stop(&mut self) {
        if let Err(e) = self.proc.stop(STOP_GRACE) {
            tracing::debug!(worker = %self.id, error = %e, "Worker stop failed");
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.proc.kill() {
            tracing::debug!(worker = %self.id, error = %e, "Worker kill failed");
        }
    }

    fn reap(&mut self) -> TerminationReason {
        self.proc.reap()
    }
}

/// Forward a worker's stdout to the event queue until EOF.
fn collect(worker: WorkerId, mut reader: LineReader, events: EventSender) {
    loop {
        match reader.read_line() {
            Ok(Some(line)) => match line.parse::<WorkerSignal>() {
                Ok(signal) => {
                    if events.send(PoolEvent::Signal { worker, signal }).is_err() {
                        return;
                    }
                }
                Err(_) => {
                    tracing::warn!(worker = %worker, line, "Ignoring unexpected worker output");
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(worker = %worker, error = %e, "Worker channel read failed");
                break;
            }
        }
    }
    let _ = events.send(PoolEvent::ChannelClosed { worker });
}

/// Spawn a named collector thread with a small stack.
fn spawn_collector_thread<F>(name: &str, f: F) -> std::io::Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .stack_size(COLLECTOR_STACK_SIZE)
        .spawn(f)
}
