//! Pending work and the logs of what happened to it.

use super::protocol::TaskParam;
use serde::Serialize;
use std::collections::VecDeque;

/// A parameter waiting for a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTask {
    pub params: TaskParam,
    /// Failed or crashed attempts so far.
    pub attempts: u32,
}

impl PendingTask {
    pub fn new(params: TaskParam) -> Self {
        Self {
            params,
            attempts: 0,
        }
    }

    /// Record one more unsuccessful attempt.
    pub fn retried(mut self) -> Self {
        self.attempts += 1;
        self
    }

    /// Whether this entry has used up `max_retries`.
    pub fn exceeds(&self, max_retries: Option<u32>) -> bool {
        max_retries.is_some_and(|cap| self.attempts > cap)
    }
}

/// FIFO of pending work. Failed work goes back to the front.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingTask>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue fresh work at the back.
    pub fn push_back(&mut self, task: PendingTask) {
        self.entries.push_back(task);
    }

    /// Put work back at the front so it is the next one dispatched.
    pub fn push_front(&mut self, task: PendingTask) {
        self.entries.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<PendingTask> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain everything still pending, in queue order.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingTask> + '_ {
        self.entries.drain(..)
    }
}

impl Extend<TaskParam> for PendingQueue {
    fn extend<I: IntoIterator<Item = TaskParam>>(&mut self, iter: I) {
        self.entries.extend(iter.into_iter().map(PendingTask::new));
    }
}

/// Append-only record of parameters, in the order they were logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TaskLog {
    entries: Vec<TaskParam>,
}

impl TaskLog {
    pub fn push(&mut self, params: TaskParam) {
        self.entries.push(params);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskParam> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<TaskParam> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a TaskLog {
    type Item = &'a TaskParam;
    type IntoIter = std::slice::Iter<'a, TaskParam>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
