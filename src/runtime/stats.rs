//! Per-node execution counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tensor::DeviceKind;

/// Counters updated by the task runtime of one node
#[derive(Debug, Default)]
pub struct RuntimeStats {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    sends: AtomicU64,
    receives: AtomicU64,
    flushes: AtomicU64,
    cpu_executions: AtomicU64,
    accelerator_executions: AtomicU64,
    kernel_time_ns: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn send_submitted(&self) {
        self.sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn receive_submitted(&self) {
        self.receives.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flushed(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn kernel_executed(&self, device: DeviceKind, elapsed: Duration) {
        match device {
            DeviceKind::Cpu => self.cpu_executions.fetch_add(1, Ordering::Relaxed),
            DeviceKind::Accelerator => self.accelerator_executions.fetch_add(1, Ordering::Relaxed),
        };
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.kernel_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            cpu_executions: self.cpu_executions.load(Ordering::Relaxed),
            accelerator_executions: self.accelerator_executions.load(Ordering::Relaxed),
            kernel_time: Duration::from_nanos(self.kernel_time_ns.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of [`RuntimeStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub sends: u64,
    pub receives: u64,
    pub flushes: u64,
    pub cpu_executions: u64,
    pub accelerator_executions: u64,
    pub kernel_time: Duration,
}

impl StatsSnapshot {
    /// Compute tasks not yet completed or failed
    pub fn tasks_pending(&self) -> u64 {
        self.tasks_submitted
            .saturating_sub(self.tasks_completed + self.tasks_failed)
    }

    /// Element-wise sum, used to aggregate over ranks
    pub fn merge(&self, other: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted + other.tasks_submitted,
            tasks_completed: self.tasks_completed + other.tasks_completed,
            tasks_failed: self.tasks_failed + other.tasks_failed,
            sends: self.sends + other.sends,
            receives: self.receives + other.receives,
            flushes: self.flushes + other.flushes,
            cpu_executions: self.cpu_executions + other.cpu_executions,
            accelerator_executions: self.accelerator_executions + other.accelerator_executions,
            kernel_time: self.kernel_time + other.kernel_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RuntimeStats::new();
        stats.task_submitted();
        stats.task_submitted();
        stats.task_completed();
        stats.send_submitted();
        stats.kernel_executed(DeviceKind::Accelerator, Duration::from_micros(3));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_submitted, 2);
        assert_eq!(snapshot.tasks_pending(), 1);
        assert_eq!(snapshot.sends, 1);
        assert_eq!(snapshot.accelerator_executions, 1);
        assert_eq!(snapshot.cpu_executions, 0);
        assert_eq!(snapshot.kernel_time, Duration::from_micros(3));
    }

    #[test]
    fn test_merge() {
        let a = StatsSnapshot {
            tasks_submitted: 2,
            receives: 1,
            ..Default::default()
        };
        let b = StatsSnapshot {
            tasks_submitted: 3,
            flushes: 4,
            ..Default::default()
        };
        let total = a.merge(&b);
        assert_eq!(total.tasks_submitted, 5);
        assert_eq!(total.receives, 1);
        assert_eq!(total.flushes, 4);
    }
}
