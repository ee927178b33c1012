//! Per-instance throughput counters.
//!
//! Kept as plain atomics on the `Store` rather than process-wide globals, so
//! multiple stores in one process never cross-contaminate each other's
//! numbers and tests can assert on a fresh instance without serializing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// What [`Stats::count`] and [`Stats::throughput`] report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// Completed write operations.
    Writes,
    /// Completed read operations.
    Reads,
}

#[derive(Default)]
pub(crate) struct Stats {
    bytes_written: AtomicU64,
    num_writes: AtomicU64,
    write_nanos: AtomicU64,
    bytes_read: AtomicU64,
    num_reads: AtomicU64,
    read_nanos: AtomicU64,
}

impl Stats {
    pub fn record_write(&self, bytes: u64, elapsed: Duration) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.write_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64, elapsed: Duration) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        self.read_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn count(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::Writes => self.num_writes.load(Ordering::Relaxed),
            StatKind::Reads => self.num_reads.load(Ordering::Relaxed),
        }
    }

    /// Bytes per second for `kind`, or `0.0` if nothing of that kind has
    /// happened yet.
    pub fn throughput(&self, kind: StatKind) -> f64 {
        let (bytes, nanos) = match kind {
            StatKind::Writes => (
                self.bytes_written.load(Ordering::Relaxed),
                self.write_nanos.load(Ordering::Relaxed),
            ),
            StatKind::Reads => (
                self.bytes_read.load(Ordering::Relaxed),
                self.read_nanos.load(Ordering::Relaxed),
            ),
        };
        if nanos == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let bytes_per_sec = (bytes as f64) / (nanos as f64 / 1_000_000_000.0);
        bytes_per_sec
    }

    pub fn reset(&self) {
        self.bytes_written.store(0, Ordering::Relaxed);
        self.num_writes.store(0, Ordering::Relaxed);
        self.write_nanos.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.num_reads.store(0, Ordering::Relaxed);
        self.read_nanos.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;

    #[test]
    fn fresh_stats_report_zero() {
        let s = Stats::default();
        assert_eq!(s.count(StatKind::Writes), 0);
        assert_eq!(s.throughput(StatKind::Reads), 0.0);
    }

    #[test]
    fn record_and_reset_round_trip() {
        let s = Stats::default();
        s.record_write(1024, Duration::from_millis(1));
        assert_eq!(s.count(StatKind::Writes), 1);
        assert!(s.throughput(StatKind::Writes) > 0.0);
        s.reset();
        assert_eq!(s.count(StatKind::Writes), 0);
    }
}
