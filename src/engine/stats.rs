//! Engine statistics accumulator and caller-facing snapshots.

use serde::Serialize;
use std::time::Duration;

/// Process-lifetime counters, written only by the engine at admission,
/// stop, and completion. Monotonically non-decreasing until restart.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub tests_started: u64,
    pub tests_succeeded: u64,
    pub tests_failed: u64,
    pub total_runtime: Duration,
}

impl EngineStats {
    /// Derive a read-only snapshot. Ratios are 0 when nothing has started
    /// yet -- never NaN or infinity.
    pub fn snapshot(&self, running: usize, queued: usize, max_concurrent: usize) -> StatsSnapshot {
        let (average_runtime_sec, success_rate) = if self.tests_started > 0 {
            (
                self.total_runtime.as_secs_f64() / self.tests_started as f64,
                self.tests_succeeded as f64 / self.tests_started as f64,
            )
        } else {
            (0.0, 0.0)
        };

        StatsSnapshot {
            tests_started: self.tests_started,
            tests_succeeded: self.tests_succeeded,
            tests_failed: self.tests_failed,
            total_runtime_sec: self.total_runtime.as_secs_f64(),
            average_runtime_sec,
            success_rate,
            running,
            queued,
            max_concurrent,
        }
    }
}

/// Read-only statistics view handed to callers and the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub tests_started: u64,
    pub tests_succeeded: u64,
    pub tests_failed: u64,
    pub total_runtime_sec: f64,
    pub average_runtime_sec: f64,
    pub success_rate: f64,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_never_divide_by_zero() {
        let stats = EngineStats::default();
        let snap = stats.snapshot(0, 0, 10);
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.average_runtime_sec, 0.0);
        assert!(snap.success_rate.is_finite());
    }

    #[test]
    fn test_snapshot_ratios() {
        let stats = EngineStats {
            tests_started: 4,
            tests_succeeded: 3,
            tests_failed: 1,
            total_runtime: Duration::from_secs(20),
        };
        let snap = stats.snapshot(2, 1, 10);
        assert_eq!(snap.success_rate, 0.75);
        assert_eq!(snap.average_runtime_sec, 5.0);
        assert_eq!(snap.running, 2);
        assert_eq!(snap.queued, 1);
    }
}
