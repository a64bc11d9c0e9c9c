use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free progress counters for one streaming run.
pub struct StreamStats {
    lines_read: AtomicU64,
    batches_scheduled: AtomicU64,
    batches_completed: AtomicU64,
}

impl StreamStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            batches_scheduled: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
        }
    }

    /// Record a batch of `lines` handed to the worker pool.
    pub fn batch_scheduled(&self, lines: usize) {
        self.lines_read.fetch_add(lines as u64, Ordering::Relaxed);
        self.batches_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch whose counts reached the aggregator.
    pub fn batch_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            batches_scheduled: self.batches_scheduled.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of streaming progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub lines_read: u64,
    pub batches_scheduled: u64,
    pub batches_completed: u64,
}

impl StreamStatsSnapshot {
    /// Batches scheduled but not yet folded into the aggregate.
    pub fn batches_in_flight(&self) -> u64 {
        self.batches_scheduled.saturating_sub(self.batches_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_complete() {
        let stats = StreamStats::new();
        stats.batch_scheduled(1000);
        stats.batch_scheduled(12);
        stats.batch_completed();

        let snap = stats.snapshot();
        assert_eq!(snap.lines_read, 1012);
        assert_eq!(snap.batches_scheduled, 2);
        assert_eq!(snap.batches_completed, 1);
        assert_eq!(snap.batches_in_flight(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = StreamStats::default().snapshot();
        assert_eq!(snap, StreamStatsSnapshot::default());
        assert_eq!(snap.batches_in_flight(), 0);
    }
}
