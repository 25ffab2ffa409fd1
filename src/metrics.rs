use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the ingestion pipeline.
///
/// Purpose:
/// - Track accepted / open / closed connections
/// - Track throughput (received / dispatched messages)
/// - Track window rollovers
///
/// These are internal operational counters. They are logged by the
/// periodic reporter and are not part of the scraped user metrics.
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Connections
    pub connections_accepted: AtomicUsize,
    pub connections_active: AtomicUsize,
    pub connections_closed: AtomicUsize,

    // Throughput
    pub messages_received: AtomicUsize,
    pub messages_dispatched: AtomicUsize,

    pub read_errors: AtomicUsize,
    pub windows_rolled: AtomicUsize,
}

impl RuntimeMetrics {
    /// One low-noise line for the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "[METRICS] conn_accepted={} conn_active={} conn_closed={} recv={} dispatched={} read_err={} rollovers={}",
            self.connections_accepted.load(Ordering::Relaxed),
            self.connections_active.load(Ordering::Relaxed),
            self.connections_closed.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
            self.messages_dispatched.load(Ordering::Relaxed),
            self.read_errors.load(Ordering::Relaxed),
            self.windows_rolled.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
