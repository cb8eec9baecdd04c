//! Process pool for running one registered task over many parameter sets.
//!
//! The pool writes a small shell artifact, spawns up to `max_parallel`
//! copies of it, and hands every worker one parameter set at a time. Each
//! worker execs back into this binary (`internal-worker` mode), looks the
//! task up in its [`TaskRegistry`] and reports `finish` or `failed` per
//! assignment.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────────────┐
//!                     │    Pool (scheduler)  │◄──── Submitter::enqueue
//!                     └──────────┬───────────┘
//!                                │ spawn / assign (stdin)
//!               ┌────────────────┼────────────────┐
//!               │                │                │
//!         ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!         │ Worker 1  │    │ Worker 2  │    │ Worker N  │
//!         │ sh <art>  │    │ sh <art>  │    │ sh <art>  │
//!         └─────┬─────┘    └─────┬─────┘    └─────┬─────┘
//!               │ finish/failed (stdout)          │
//!         ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!         │ collector │    │ collector │    │ collector │
//!         └─────┬─────┘    └─────┬─────┘    └─────┬─────┘
//!               └───────────► event queue ◄───────┘
//! ```
//!
//! # Features
//!
//! - **FIFO with retry priority**: failed parameters go back to the front
//! - **Worker reuse**: finished workers take the next parameter set
//! - **Crash recovery**: workers that die mid-task are replaced and their
//!   parameter requeued
//! - **Deadlines**: assignments running past `time_to_close` are killed

mod artifact;
mod config;
mod event;
mod ipc;
mod lifecycle;
mod pool;
mod proc;
mod protocol;
mod queue;
mod registry;
mod signals;
mod spawn;
mod stats;
#[cfg(test)]
mod testing;
pub mod worker_main;

pub use artifact::{Artifact, BOOTSTRAP_TEMPLATE, TaskBody, build as build_artifact, build_new as build_new_artifact};
pub use config::{DEFAULT_SHELL, DEFAULT_TICK, DEFAULT_TIME_TO_CLOSE, PoolConfig, default_parallelism};
pub use event::PoolEvent;
pub use lifecycle::{WorkerId, WorkerState};
pub use pool::{Pass, Pool, PoolStatus, Submitter};
pub use protocol::{ControlMessage, TaskParam, WorkerSignal};
pub use queue::TaskLog;
pub use registry::{TaskEntry, TaskFn, TaskRegistry, is_valid_task_name};
pub use signals::{EXIT_BAD_ARGS, EXIT_NO_WORKER_EXE, EXIT_UNKNOWN_TASK, TerminationReason};
pub use spawn::{ProcessSpawner, SpawnRequest, Spawner, WORKER_EXE_ENV, WorkerHandle};
pub use stats::{PoolReport, PoolStats};
pub use worker_main::run_worker_main;
