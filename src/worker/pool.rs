//! Process pool orchestration.
//!
//! A [`Pool`] owns the worker table, the pending queue and the logs. One
//! scheduling routine (the thread calling [`Pool::run`] or [`Pool::poll`])
//! is the only writer; collector threads and [`Submitter`]s talk to it
//! through the event queue.
//!
//! Each pass first enforces deadlines, then reconciles the table against
//! the queue:
//!
//! | status | queue > 0                                 | queue == 0 |
//! |--------|-------------------------------------------|------------|
//! | Empty  | spawn up to `max_parallel`, pre-assigned  | drained    |
//! | Busy   | reuse every available worker, then top up | wait       |
//! | Idle   | reuse every available worker, then top up | drained    |
//!
//! After [`Submitter::drain`] nothing more is assigned or spawned, and the
//! pass reports [`Pass::Stopped`] once no worker is busy.

use super::artifact::{self, Artifact, BOOTSTRAP_TEMPLATE, TaskBody};
use super::config::PoolConfig;
use super::event::{self, EventReceiver, EventSender, PoolEvent};
use super::lifecycle::{AssignError, WorkerId, WorkerRecord, WorkerState};
use super::protocol::{TaskParam, WorkerSignal};
use super::queue::{PendingQueue, PendingTask};
use super::spawn::{ProcessSpawner, SpawnRequest, Spawner};
use super::stats::PoolReport;
use crate::error::{ArtifactStage, PoolError, Result};
use crate::paths;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Pool status derived from the worker table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// No workers exist.
    Empty,
    /// At least one worker is running an assignment.
    Busy,
    /// Workers exist, none of them busy.
    Idle,
}

/// Result of one scheduling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Work is queued or in flight.
    Working,
    /// Nothing queued and nothing running.
    Drained,
    /// A shutdown was requested through a [`Submitter`], or a requested
    /// drain finished.
    Stopped,
}

/// Cloneable handle for feeding a running pool from other threads.
#[derive(Debug, Clone)]
pub struct Submitter {
    events: EventSender,
    closed: Arc<AtomicBool>,
}

impl Submitter {
    /// Queue more parameter sets behind the existing ones.
    pub fn enqueue<I>(&self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = TaskParam>,
    {
        self.send(
            PoolEvent::Enqueue {
                params: params.into_iter().collect(),
            },
            "enqueue",
        )
    }

    /// Ask the scheduler to stop after the current batch of events.
    ///
    /// In-flight work is killed and reported as lost.
    pub fn shutdown(&self) -> Result<()> {
        self.send(PoolEvent::Shutdown, "request shutdown")
    }

    /// Ask the scheduler to stop handing out work and to stop once every
    /// busy worker has reported.
    ///
    /// Queued parameters end up in the report's `pending` log.
    pub fn drain(&self) -> Result<()> {
        self.send(PoolEvent::Drain, "request drain")
    }

    fn send(&self, event: PoolEvent, operation: &'static str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed { operation });
        }
        self.events
            .send(event)
            .map_err(|_| PoolError::Closed { operation })
    }
}

/// A bounded pool of worker processes running one registered task.
pub struct Pool {
    config: PoolConfig,
    spawner: Box<dyn Spawner>,
    artifact: Option<Artifact>,
    artifact_path: PathBuf,
    workers: BTreeMap<WorkerId, WorkerRecord>,
    queue: PendingQueue,
    report: PoolReport,
    events_tx: EventSender,
    events_rx: EventReceiver,
    /// Workers that left the table and have not been replaced yet.
    vacancies: usize,
    started_at: Option<Instant>,
    stop_requested: bool,
    /// No new assignments; stop once nothing is busy.
    draining: bool,
    fatal: Option<PoolError>,
    closed: Arc<AtomicBool>,
}

impl Pool {
    /// Create a pool that runs real worker processes.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let worker_exe = config
            .worker_exe
            .clone()
            .ok_or_else(|| PoolError::Config("no worker executable configured".to_string()))?;
        let spawner = ProcessSpawner::new(&config.shell, worker_exe);
        Self::with_spawner(config, Box::new(spawner))
    }

    /// Create a pool with a custom [`Spawner`].
    ///
    /// Validates the configuration and writes the artifact; no worker is
    /// started until the first pass.
    pub fn with_spawner(config: PoolConfig, spawner: Box<dyn Spawner>) -> Result<Self> {
        config.validate()?;
        let body = TaskBody::new(&config.task)?;

        paths::ensure_dir(&config.work_dir).map_err(|source| PoolError::Artifact {
            stage: ArtifactStage::Create,
            path: config.work_dir.clone(),
            source,
        })?;
        let artifact_path = config.resolve_artifact_path();
        // A generated name must never land on another pool's file.
        let build = if config.artifact_name.is_some() {
            artifact::build
        } else {
            artifact::build_new
        };
        let artifact = build(&artifact_path, &config.dependency, &body, BOOTSTRAP_TEMPLATE)?;

        let mut queue = PendingQueue::new();
        queue.extend(config.task_params.iter().cloned());

        info!(
            task = %config.task,
            max_parallel = config.max_parallel,
            queued = queue.len(),
            time_to_close_secs = config.time_to_close.map(|d| d.as_secs_f64()),
            max_retries = config.max_retries,
            artifact = %artifact_path.display(),
            "Initializing process pool"
        );

        let (events_tx, events_rx) = event::channel();
        Ok(Self {
            config,
            spawner,
            artifact: Some(artifact),
            artifact_path,
            workers: BTreeMap::new(),
            queue,
            report: PoolReport::default(),
            events_tx,
            events_rx,
            vacancies: 0,
            started_at: None,
            stop_requested: false,
            draining: false,
            fatal: None,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Current status signal.
    pub fn status(&self) -> PoolStatus {
        if self.workers.is_empty() {
            PoolStatus::Empty
        } else if self
            .workers
            .values()
            .any(|w| w.state() == WorkerState::Busy)
        {
            PoolStatus::Busy
        } else {
            PoolStatus::Idle
        }
    }

    /// Number of workers in the table.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of busy workers.
    pub fn busy_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.state() == WorkerState::Busy)
            .count()
    }

    /// Snapshot of every worker's id and state.
    pub fn workers(&self) -> Vec<(WorkerId, WorkerState)> {
        self.workers
            .iter()
            .map(|(id, w)| (*id, w.state()))
            .collect()
    }

    /// Parameter sets waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Accounting so far.
    pub fn report(&self) -> &PoolReport {
        &self.report
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A handle other threads can use to add work or stop the pool.
    pub fn submitter(&self) -> Submitter {
        Submitter {
            events: self.events_tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Queue more parameter sets behind the existing ones.
    pub fn enqueue<I>(&mut self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = TaskParam>,
    {
        self.ensure_open("enqueue")?;
        self.queue.extend(params);
        Ok(())
    }

    /// Drive the pool until the queue drains (or a shutdown is requested),
    /// then close it.
    pub fn run(&mut self) -> Result<PoolReport> {
        self.ensure_open("run")?;
        let tick = self.config.tick;
        loop {
            match self.poll(tick)? {
                Pass::Working => {}
                Pass::Drained => {
                    debug!("Queue drained");
                    break;
                }
                Pass::Stopped => {
                    info!(pending = self.queue.len(), drained = self.draining, "Shutdown requested");
                    break;
                }
            }
        }
        self.close()
    }

    /// Run one scheduling step, waiting at most `timeout` for worker events.
    ///
    /// An unrecoverable worker failure closes the pool and is returned as
    /// an error.
    pub fn poll(&mut self, timeout: Duration) -> Result<Pass> {
        self.ensure_open("poll")?;
        self.started_at.get_or_insert_with(Instant::now);

        self.drain_events();
        if let Some(err) = self.fatal.take() {
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to close process pool after fatal worker error");
            }
            return Err(err);
        }
        let pass = self.reconcile();
        if pass != Pass::Working {
            return Ok(pass);
        }

        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                self.drain_events();
            }
            Err(RecvTimeoutError::Timeout) => {}
            // The pool holds a sender itself, so this cannot happen while open.
            Err(RecvTimeoutError::Disconnected) => {}
        }
        Ok(Pass::Working)
    }

    /// Terminate and forget one worker.
    ///
    /// Its in-flight parameter, if any, is recorded as lost rather than
    /// requeued. Returns whether the worker was in the table.
    pub fn remove_worker(&mut self, id: WorkerId) -> Result<bool> {
        self.ensure_open("remove a worker")?;
        let Some(mut record) = self.workers.remove(&id) else {
            debug!(worker = %id, "Worker not in pool");
            return Ok(false);
        };
        if let Some(task) = record.terminate() {
            warn!(worker = %id, params = %task.params, "Removed busy worker; parameter lost");
            self.report.lost.push(task.params);
        }
        self.vacancies += 1;
        info!(worker = %id, jobs_completed = record.jobs_completed(), "Removed worker");
        Ok(true)
    }

    /// Terminate every worker, remove the artifact and stop scheduling.
    ///
    /// Busy workers are killed and their parameters recorded as lost; use
    /// [`Submitter::drain`] to let them finish first. A failure to remove
    /// the artifact is logged and the report is still returned. Closing
    /// twice is an error.
    #[instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<PoolReport> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyClosed);
        }

        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        for (id, mut record) in workers {
            if let Some(task) = record.terminate() {
                debug!(worker = %id, params = %task.params, "Terminated busy worker at shutdown");
                self.report.lost.push(task.params);
            }
        }
        for task in self.queue.drain() {
            self.report.pending.push(task.params);
        }

        if let Some(started) = self.started_at {
            self.report.stats.elapsed = started.elapsed();
        }

        info!(
            workers = count,
            completed = self.report.completed.len(),
            abandoned = self.report.abandoned.len(),
            lost = self.report.lost.len(),
            "Process pool closed"
        );

        if let Some(artifact) = self.artifact.take()
            && let Err(e) = artifact.remove()
        {
            warn!(error = %e, "Failed to remove worker artifact");
        }
        Ok(std::mem::take(&mut self.report))
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(PoolError::Closed { operation })
        } else {
            Ok(())
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    /// One reconciliation pass.
    fn reconcile(&mut self) -> Pass {
        self.enforce_deadlines();

        if self.stop_requested {
            return Pass::Stopped;
        }
        if self.draining {
            for worker in self.workers.values_mut() {
                worker.settle();
            }
            return match self.status() {
                PoolStatus::Busy => Pass::Working,
                PoolStatus::Empty | PoolStatus::Idle => Pass::Stopped,
            };
        }
        if !self.queue.is_empty() {
            self.assign_available();
            self.top_up();
        }
        for worker in self.workers.values_mut() {
            worker.settle();
        }

        let status = self.status();
        trace!(
            ?status,
            workers = self.workers.len(),
            pending = self.queue.len(),
            "Reconciled"
        );
        match status {
            _ if !self.queue.is_empty() => Pass::Working,
            PoolStatus::Busy => Pass::Working,
            PoolStatus::Empty | PoolStatus::Idle => Pass::Drained,
        }
    }

    fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Signal { worker, signal } => self.handle_signal(worker, signal),
            PoolEvent::ChannelClosed { worker } => self.handle_channel_closed(worker),
            PoolEvent::Enqueue { params } => {
                debug!(count = params.len(), "Enqueued parameters");
                self.queue.extend(params);
            }
            PoolEvent::Shutdown => self.stop_requested = true,
            PoolEvent::Drain => {
                debug!(busy = self.busy_count(), pending = self.queue.len(), "Draining");
                self.draining = true;
            }
        }
    }

    fn handle_signal(&mut self, worker: WorkerId, signal: WorkerSignal) {
        let Some(record) = self.workers.get_mut(&worker) else {
            debug!(worker = %worker, %signal, "Signal from worker no longer in pool");
            return;
        };
        let outcome = match signal {
            WorkerSignal::Finish => record.mark_finished(),
            WorkerSignal::Failed => record.mark_failed(),
        };
        let Some(outcome) = outcome else {
            warn!(worker = %worker, %signal, state = ?record.state(), "Ignoring signal with nothing in flight");
            return;
        };

        match signal {
            WorkerSignal::Finish => {
                trace!(
                    worker = %worker,
                    params = %outcome.task.params,
                    latency_ms = outcome.elapsed.as_millis(),
                    "Task finished"
                );
                self.report.stats.record_completion(outcome.elapsed);
                self.report.completed.push(outcome.task.params);
            }
            WorkerSignal::Failed => {
                debug!(
                    worker = %worker,
                    params = %outcome.task.params,
                    attempts = outcome.task.attempts + 1,
                    "Task failed"
                );
                self.report.stats.failed_attempts += 1;
                self.requeue(outcome.task);
            }
        }
    }

    fn handle_channel_closed(&mut self, worker: WorkerId) {
        let Some(mut record) = self.workers.remove(&worker) else {
            trace!(worker = %worker, "Channel closed for departed worker");
            return;
        };
        let (reason, in_flight) = record.reap();
        self.vacancies += 1;

        let Some(task) = in_flight else {
            debug!(worker = %worker, %reason, "Worker exited while idle");
            return;
        };

        self.report.stats.crashes += 1;
        warn!(
            worker = %worker,
            %reason,
            params = %task.params,
            recoverable = reason.is_recoverable(),
            "Worker exited without reporting"
        );

        if reason.is_recoverable() {
            self.requeue(task);
        } else {
            self.queue.push_front(task);
            self.fatal.get_or_insert(PoolError::WorkerBootstrap {
                worker: worker.as_u32(),
                task: self.config.task.clone(),
                reason: reason.description(),
            });
        }
    }

    /// Put failed work back at the front, or abandon it past the retry cap.
    fn requeue(&mut self, task: PendingTask) {
        let task = task.retried();
        if task.exceeds(self.config.max_retries) {
            warn!(
                params = %task.params,
                attempts = task.attempts,
                "Abandoning parameter after too many failures"
            );
            self.report.abandoned.push(task.params);
        } else {
            self.report.stats.requeued += 1;
            self.queue.push_front(task);
        }
    }

    fn enforce_deadlines(&mut self) {
        let Some(limit) = self.config.time_to_close else {
            return;
        };
        let now = Instant::now();
        let overdue: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.busy_for(now).is_some_and(|d| d > limit))
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            let Some(mut record) = self.workers.remove(&id) else {
                continue;
            };
            let in_flight = record.terminate();
            self.vacancies += 1;
            self.report.stats.deadline_kills += 1;
            warn!(
                worker = %id,
                time_to_close_secs = limit.as_secs_f64(),
                "Worker exceeded time_to_close, killed"
            );
            if let Some(task) = in_flight {
                self.requeue(task);
            }
        }
    }

    /// Hand the next queued parameters to every worker that can take one.
    fn assign_available(&mut self) {
        let available: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.state().is_available())
            .map(|(id, _)| *id)
            .collect();

        for id in available {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            let Some(record) = self.workers.get_mut(&id) else {
                self.queue.push_front(task);
                continue;
            };
            match record.assign(task) {
                Ok(()) => trace!(worker = %id, "Reused worker"),
                Err(AssignError::Channel { task, source }) => {
                    warn!(worker = %id, error = %source, "Assignment failed, replacing worker");
                    self.queue.push_front(task);
                    if let Some(mut record) = self.workers.remove(&id) {
                        record.terminate();
                        self.vacancies += 1;
                    }
                }
                Err(err) => self.queue.push_front(err.into_task()),
            }
        }
    }

    /// Spawn workers while there is both queued work and room under the cap.
    fn top_up(&mut self) {
        loop {
            match self.add_worker() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, pending = self.queue.len(), "Spawn failed, retrying next pass");
                    break;
                }
            }
        }
    }

    /// Spawn one worker pre-assigned the next queued parameter.
    ///
    /// Returns `None` when the queue is empty or the pool is at
    /// `max_parallel`. On failure the parameter goes back to the front.
    fn add_worker(&mut self) -> Result<Option<WorkerId>> {
        if self.workers.len() >= self.config.max_parallel {
            return Ok(None);
        }
        let Some(task) = self.queue.pop_front() else {
            return Ok(None);
        };

        let spawned = self.spawner.spawn(SpawnRequest {
            artifact: &self.artifact_path,
            initial: &task.params,
            events: &self.events_tx,
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.report.stats.spawn_failures += 1;
                self.queue.push_front(task);
                return Err(e);
            }
        };

        let id = handle.id();
        self.report.stats.spawned += 1;
        if self.vacancies > 0 {
            self.vacancies -= 1;
            self.report.stats.respawned += 1;
        }
        debug!(worker = %id, params = %task.params, "Spawned worker");
        self.workers.insert(id, WorkerRecord::new(handle, task));
        Ok(Some(id))
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.is_closed()
            && let Err(e) = self.close()
        {
            warn!(error = %e, "Failed to close process pool on drop");
        }
    }
}
