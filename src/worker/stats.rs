//! Run statistics and the final report.

use super::queue::TaskLog;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Counters collected while the pool runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Worker processes started.
    pub spawned: usize,
    /// Spawns that replaced a worker which left the table.
    pub respawned: usize,
    /// Spawn attempts that failed and were retried.
    pub spawn_failures: usize,
    /// Parameters reported `finish`.
    pub completed: usize,
    /// `failed` reports received.
    pub failed_attempts: usize,
    /// Parameters pushed back to the front of the queue.
    pub requeued: usize,
    /// Workers killed for exceeding `time_to_close`.
    pub deadline_kills: usize,
    /// Workers whose channel closed while busy.
    pub crashes: usize,
    /// Wall time of the run.
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Mean time from assignment to `finish`.
    #[serde(rename = "average_latency_ms", serialize_with = "as_millis")]
    pub average_latency: Duration,
    #[serde(skip)]
    total_latency: Duration,
}

impl PoolStats {
    /// Account one finished assignment.
    pub fn record_completion(&mut self, latency: Duration) {
        self.completed += 1;
        self.total_latency += latency;
        self.average_latency = self.total_latency.div_f64(self.completed as f64);
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Completed {} tasks in {:.2}s (avg latency {:.1}ms)",
            self.completed,
            self.elapsed.as_secs_f64(),
            self.average_latency.as_secs_f64() * 1000.0
        )?;
        write!(
            f,
            "Workers: {} spawned, {} respawned, {} crashed, {} killed at deadline; \
             {} failed attempts, {} requeued",
            self.spawned,
            self.respawned,
            self.crashes,
            self.deadline_kills,
            self.failed_attempts,
            self.requeued
        )
    }
}

/// Outcome of [`super::Pool::run`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolReport {
    /// Parameters whose worker reported `finish`, in completion order.
    pub completed: TaskLog,
    /// Parameters dropped after exceeding `max_retries`.
    pub abandoned: TaskLog,
    /// Parameters in flight on workers removed or shut down.
    pub lost: TaskLog,
    /// Parameters still queued when the pool closed.
    pub pending: TaskLog,
    pub stats: PoolStats,
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stats)?;
        if !self.abandoned.is_empty() {
            write!(f, "\nAbandoned after retries: {}", self.abandoned.len())?;
        }
        if !self.lost.is_empty() {
            write!(f, "\nLost at shutdown: {}", self.lost.len())?;
        }
        if !self.pending.is_empty() {
            write!(f, "\nStill queued: {}", self.pending.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::TaskParam;
    use serde_json::json;

    #[test]
    fn test_average_latency() {
        let mut stats = PoolStats::default();
        stats.record_completion(Duration::from_millis(10));
        stats.record_completion(Duration::from_millis(30));
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.average_latency, Duration::from_millis(20));
    }

    #[test]
    fn test_average_latency_past_u32_completions() {
        let mut stats = PoolStats {
            completed: u32::MAX as usize,
            total_latency: Duration::from_secs(u32::MAX as u64),
            ..Default::default()
        };
        stats.record_completion(Duration::from_secs(1));
        assert_eq!(stats.completed, u32::MAX as usize + 1);
        assert_eq!(stats.average_latency, Duration::from_secs(1));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let mut stats = PoolStats::default();
        stats.record_completion(Duration::from_millis(5));
        stats.elapsed = Duration::from_millis(1500);
        stats.spawned = 2;

        let text = stats.to_string();
        assert!(text.contains("Completed 1 tasks in 1.50s"));
        assert!(text.contains("avg latency 5.0ms"));
        assert!(text.contains("2 spawned"));
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = PoolReport::default();
        report.completed.push(TaskParam::new(json!([1])));
        report.stats.elapsed = Duration::from_millis(250);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["completed"], json!([[1]]));
        assert_eq!(value["abandoned"], json!([]));
        assert_eq!(value["stats"]["elapsed_ms"], json!(250.0));
        assert!(value["stats"].get("total_latency").is_none());
    }

    #[test]
    fn test_report_display_lists_abandoned() {
        let mut report = PoolReport::default();
        report.abandoned.push(TaskParam::new(json!("bad")));
        assert!(report.to_string().contains("Abandoned after retries: 1"));
        assert!(!report.to_string().contains("Lost"));
    }
}
