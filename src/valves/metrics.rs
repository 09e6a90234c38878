use dashmap::DashMap;
use http::StatusCode;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::DispatchError;
use crate::pipeline::{Next, Valve};
use crate::server::{Request, Response};

/// Valve collecting request metrics
///
/// Tracks request counts, latency and responses per status code. Counters are
/// atomics and the status table is a sharded map, so the valve never blocks requests.
///
/// Metrics collected:
/// - Total request count
/// - Average latency (time spent in the rest of the pipeline)
/// - Requests whose pipeline returned an error
/// - Responses per status code
#[derive(Default)]
pub struct MetricsValve {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
    failures: AtomicUsize,
    status_counts: DashMap<u16, AtomicU64>,
}

impl MetricsValve {
    /// Create a metrics valve with all counters initialized to zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of requests processed
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Calculate the average request latency
    ///
    /// Returns zero duration if no requests have been processed yet.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_nanos(self.max_latency_ns.load(Ordering::Relaxed))
    }

    /// Requests for which the rest of the pipeline returned an error
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Responses sent with `status`
    pub fn status_count(&self, status: StatusCode) -> u64 {
        self.status_counts
            .get(&status.as_u16())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// `(status, count)` pairs sorted by status
    pub fn status_counts(&self) -> Vec<(u16, u64)> {
        let mut counts: Vec<(u16, u64)> = self
            .status_counts
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();
        counts.sort_unstable();
        counts
    }
}

impl Valve for MetricsValve {
    fn name(&self) -> &str {
        "MetricsValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = next.invoke(req, res);
        let latency = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(latency, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(latency, Ordering::Relaxed);

        let status = if result.is_err() && !res.is_committed() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            if result.is_err() {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            res.status()
        };
        self.status_counts
            .entry(status.as_u16())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        result
    }
}
