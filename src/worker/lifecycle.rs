//! Lifecycle of a single worker.
//!
//! ```text
//!   spawn ──► Busy ──finish──► Completed ──┐
//!              ▲  └──failed──► Failed ─────┤ (not reassigned this pass)
//!              │                           ▼
//!              └────────── assign ◄────── Idle
//!
//!   any non-terminal state ── terminate / death ──► Terminated
//! ```
//!
//! A [`WorkerRecord`] owns its [`WorkerHandle`] exclusively and applies
//! transitions; it never decides what to run next.

use super::protocol::ControlMessage;
use super::queue::PendingTask;
use super::signals::TerminationReason;
use super::spawn::WorkerHandle;
use crate::error::PoolError;
use nix::unistd::Pid;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Identity of a worker: its OS process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Wrap a raw id.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<Pid> for WorkerId {
    fn from(pid: Pid) -> Self {
        Self(pid.as_raw().unsigned_abs())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Alive with nothing assigned.
    Idle,
    /// Running an assignment.
    Busy,
    /// Reported `finish` for its last assignment.
    Completed,
    /// Reported `failed` for its last assignment.
    Failed,
    /// Killed or exited. Terminal.
    Terminated,
}

impl WorkerState {
    /// Can this worker take a new assignment?
    pub fn is_available(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Failed)
    }

    /// Is this the terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// A finished assignment handed back to the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The work that was processed.
    pub task: PendingTask,
    /// Time between assignment and report.
    pub elapsed: Duration,
}

/// Why an assignment did not reach the worker.
#[derive(Debug)]
pub enum AssignError {
    /// The worker is busy or terminated.
    Unavailable { task: PendingTask, state: WorkerState },
    /// Writing to the worker's channel failed.
    Channel { task: PendingTask, source: PoolError },
}

impl AssignError {
    /// Recover the work that was not assigned.
    pub fn into_task(self) -> PendingTask {
        match self {
            Self::Unavailable { task, .. } | Self::Channel { task, .. } => task,
        }
    }
}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { state, .. } => write!(f, "worker is {:?}", state),
            Self::Channel { source, .. } => write!(f, "{}", source),
        }
    }
}

/// One spawned worker in the pool's table.
pub struct WorkerRecord {
    id: WorkerId,
    state: WorkerState,
    handle: Box<dyn WorkerHandle>,
    /// Work in flight while busy.
    current: Option<PendingTask>,
    assigned_at: Instant,
    jobs_completed: usize,
    jobs_failed: usize,
}

impl WorkerRecord {
    /// Wrap a freshly spawned worker already running `initial`.
    pub fn new(handle: Box<dyn WorkerHandle>, initial: PendingTask) -> Self {
        Self {
            id: handle.id(),
            state: WorkerState::Busy,
            handle,
            current: Some(initial),
            assigned_at: Instant::now(),
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Work currently in flight.
    pub fn current(&self) -> Option<&PendingTask> {
        self.current.as_ref()
    }

    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed
    }

    pub fn jobs_failed(&self) -> usize {
        self.jobs_failed
    }

    /// How long the current assignment has been running, if busy.
    pub fn busy_for(&self, now: Instant) -> Option<Duration> {
        (self.state == WorkerState::Busy).then(|| now.saturating_duration_since(self.assigned_at))
    }

    /// Send a new parameter set to an available worker.
    pub fn assign(&mut self, task: PendingTask) -> Result<(), AssignError> {
        if !self.state.is_available() {
            return Err(AssignError::Unavailable {
                task,
                state: self.state,
            });
        }

        if let Err(source) = self.handle.send(&ControlMessage::assign(task.params.clone())) {
            return Err(AssignError::Channel { task, source });
        }

        self.current = Some(task);
        self.assigned_at = Instant::now();
        self.state = WorkerState::Busy;
        Ok(())
    }

    /// Apply a `finish` report. Returns `None` for a report with nothing in flight.
    pub fn mark_finished(&mut self) -> Option<Outcome> {
        if self.state != WorkerState::Busy {
            return None;
        }
        self.state = WorkerState::Completed;
        self.jobs_completed += 1;
        self.take_outcome()
    }

    /// Apply a `failed` report. Returns `None` for a report with nothing in flight.
    pub fn mark_failed(&mut self) -> Option<Outcome> {
        if self.state != WorkerState::Busy {
            return None;
        }
        self.state = WorkerState::Failed;
        self.jobs_failed += 1;
        self.take_outcome()
    }

    /// Park a worker that reported but was not reassigned this pass.
    pub fn settle(&mut self) {
        if matches!(self.state, WorkerState::Completed | WorkerState::Failed) {
            self.state = WorkerState::Idle;
        }
    }

    /// Kill the worker. Returns the work it was running, if any.
    ///
    /// Busy workers are killed outright; idle ones are asked to exit first.
    pub fn terminate(&mut self) -> Option<PendingTask> {
        match self.state {
            WorkerState::Terminated => return None,
            WorkerState::Busy => self.handle.kill(),
            _ => self.handle.stop(),
        }
        self.state = WorkerState::Terminated;
        self.current.take()
    }

    /// Record that the worker's channel closed on its own.
    ///
    /// Returns why it exited and the work it never reported on.
    pub fn reap(&mut self) -> (TerminationReason, Option<PendingTask>) {
        if self.state == WorkerState::Terminated {
            return (TerminationReason::Unknown, None);
        }
        let reason = self.handle.reap();
        self.state = WorkerState::Terminated;
        (reason, self.current.take())
    }

    fn take_outcome(&mut self) -> Option<Outcome> {
        let elapsed = self.assigned_at.elapsed();
        self.current.take().map(|task| Outcome { task, elapsed })
    }
}

impl fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("current", &self.current)
            .field("jobs_completed", &self.jobs_completed)
            .field("jobs_failed", &self.jobs_failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::FakeWorld;
    use crate::worker::protocol::TaskParam;
    use serde_json::json;

    fn param(n: i64) -> TaskParam {
        TaskParam::new(json!([n]))
    }

    fn task(n: i64) -> PendingTask {
        PendingTask::new(param(n))
    }

    #[test]
    fn test_new_worker_is_busy_with_initial_param() {
        let world = FakeWorld::new();
        let record = WorkerRecord::new(world.handle(1), task(1));
        assert_eq!(record.state(), WorkerState::Busy);
        assert_eq!(record.current(), Some(&task(1)));
        assert_eq!(record.id(), WorkerId::new(1));
    }

    #[test]
    fn test_finish_then_reassign() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        let outcome = record.mark_finished().unwrap();
        assert_eq!(outcome.task.params, param(1));
        assert_eq!(record.state(), WorkerState::Completed);
        assert_eq!(record.jobs_completed(), 1);

        record.assign(task(2)).unwrap();
        assert_eq!(record.state(), WorkerState::Busy);
        assert_eq!(record.current(), Some(&task(2)));
        assert_eq!(
            world.sent(),
            vec![(WorkerId::new(1), ControlMessage::assign(param(2)))]
        );
    }

    #[test]
    fn test_duplicate_reports_are_ignored() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        assert!(record.mark_finished().is_some());
        assert!(record.mark_finished().is_none());
        assert!(record.mark_failed().is_none());
        assert_eq!(record.state(), WorkerState::Completed);
        assert_eq!(record.jobs_completed(), 1);
        assert_eq!(record.jobs_failed(), 0);
    }

    #[test]
    fn test_failed_worker_can_be_reused() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        assert_eq!(record.mark_failed().unwrap().task, task(1));
        assert_eq!(record.state(), WorkerState::Failed);
        record.assign(task(9)).unwrap();
        assert_eq!(record.state(), WorkerState::Busy);
    }

    #[test]
    fn test_assign_to_busy_worker_is_rejected() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        let err = record.assign(task(2)).unwrap_err();
        assert!(matches!(
            err,
            AssignError::Unavailable {
                state: WorkerState::Busy,
                ..
            }
        ));
        assert_eq!(err.into_task(), task(2));
        assert_eq!(record.current(), Some(&task(1)));
        assert!(world.sent().is_empty());
    }

    #[test]
    fn test_assign_channel_failure_returns_param() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));
        record.mark_finished();
        world.break_channels();

        let err = record.assign(task(2)).unwrap_err();
        assert!(matches!(err, AssignError::Channel { .. }));
        assert_eq!(err.into_task(), task(2));
        assert_eq!(record.state(), WorkerState::Completed);
    }

    #[test]
    fn test_settle_parks_reported_workers() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));
        record.settle();
        assert_eq!(record.state(), WorkerState::Busy);

        record.mark_finished();
        record.settle();
        assert_eq!(record.state(), WorkerState::Idle);
        record.assign(task(2)).unwrap();
        assert_eq!(record.state(), WorkerState::Busy);
    }

    #[test]
    fn test_terminate_busy_worker_kills_and_returns_param() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        assert_eq!(record.terminate(), Some(task(1)));
        assert_eq!(record.state(), WorkerState::Terminated);
        assert_eq!(world.killed(), vec![WorkerId::new(1)]);
        assert!(world.stopped().is_empty());

        // Terminal and idempotent.
        assert_eq!(record.terminate(), None);
        assert_eq!(world.killed().len(), 1);
        assert!(record.assign(task(2)).is_err());
    }

    #[test]
    fn test_terminate_idle_worker_stops_gracefully() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));
        record.mark_finished();
        record.settle();

        assert_eq!(record.terminate(), None);
        assert_eq!(world.stopped(), vec![WorkerId::new(1)]);
        assert!(world.killed().is_empty());
    }

    #[test]
    fn test_reap_returns_unreported_param() {
        let world = FakeWorld::new();
        let mut record = WorkerRecord::new(world.handle(1), task(1));

        let (reason, lost) = record.reap();
        assert_eq!(reason, TerminationReason::Exited(1));
        assert_eq!(lost, Some(task(1)));
        assert_eq!(record.state(), WorkerState::Terminated);
        assert!(record.busy_for(Instant::now()).is_none());
    }

    #[test]
    fn test_worker_id_from_pid() {
        assert_eq!(WorkerId::from(Pid::from_raw(4321)), WorkerId::new(4321));
        assert_eq!(WorkerId::new(7).to_string(), "7");
    }
}
