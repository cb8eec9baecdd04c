//! Events consumed by the pool's scheduling routine.
//!
//! Collector threads, submitters and shutdown requests all funnel into one
//! ordered queue; only the scheduling routine mutates pool state.

use super::lifecycle::WorkerId;
use super::protocol::{TaskParam, WorkerSignal};
use std::sync::mpsc;

/// Something the scheduler has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A worker reported the outcome of its current assignment.
    Signal {
        worker: WorkerId,
        signal: WorkerSignal,
    },
    /// A worker's stdout reached EOF (it exited or crashed).
    ChannelClosed { worker: WorkerId },
    /// New work submitted while the pool is running.
    Enqueue { params: Vec<TaskParam> },
    /// Stop scheduling and close the pool.
    Shutdown,
    /// Stop assigning; close once no worker is busy.
    Drain,
}

/// Sending half of the event queue.
pub type EventSender = mpsc::Sender<PoolEvent>;

/// Receiving half of the event queue.
pub type EventReceiver = mpsc::Receiver<PoolEvent>;

/// Create a fresh event queue.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
