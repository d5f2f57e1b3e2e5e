use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking transfer outcomes.
///
/// All counters use relaxed ordering. For a point-in-time view, call
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    /// Upload sessions registered.
    pub sessions_opened: AtomicU64,
    /// Upload sessions that received every declared byte.
    pub sessions_completed: AtomicU64,
    /// Upload sessions torn down by an error or a disconnect.
    pub sessions_aborted: AtomicU64,
    /// Upload sessions evicted for inactivity.
    pub sessions_reaped: AtomicU64,
    pub chunks_written: AtomicU64,
    pub bytes_written: AtomicU64,
    /// Upload messages answered with `NAK`.
    pub naks: AtomicU64,
    pub download_requests: AtomicU64,
    /// Download requests answered with `ERR`.
    pub download_errors: AtomicU64,
    pub bytes_served: AtomicU64,
}

impl BrokerMetrics {
    pub fn increment_sessions_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sessions_reaped(&self, count: u64) {
        self.sessions_reaped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one chunk of `bytes` written to storage.
    pub fn record_chunk(&self, bytes: u64) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_naks(&self) {
        self.naks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_download_requests(&self) {
        self.download_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_download_errors(&self) {
        self.download_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            naks: self.naks.load(Ordering::Relaxed),
            download_requests: self.download_requests.load(Ordering::Relaxed),
            download_errors: self.download_errors.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`BrokerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub sessions_reaped: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub naks: u64,
    pub download_requests: u64,
    pub download_errors: u64,
    pub bytes_served: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let metrics = BrokerMetrics::default();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn record_chunk_counts_chunks_and_bytes() {
        let metrics = BrokerMetrics::default();
        metrics.record_chunk(25_000);
        metrics.record_chunk(12_500);
        metrics.increment_naks();
        metrics.add_sessions_reaped(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.chunks_written, 2);
        assert_eq!(snap.bytes_written, 37_500);
        assert_eq!(snap.naks, 1);
        assert_eq!(snap.sessions_reaped, 2);
    }
}
