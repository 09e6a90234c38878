use http::StatusCode;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::pipeline::{Next, Valve};
use crate::server::{Request, Response};

/// Answers 503 without calling the next valve while engaged, e.g. during maintenance.
#[derive(Debug, Default)]
pub struct ServiceUnavailableValve {
    engaged: AtomicBool,
    retry_after: RwLock<Option<Duration>>,
}

impl ServiceUnavailableValve {
    #[must_use]
    pub fn new(engaged: bool) -> Self {
        Self {
            engaged: AtomicBool::new(engaged),
            retry_after: RwLock::new(None),
        }
    }

    /// Announce `retry_after` in a `Retry-After` header
    #[must_use]
    pub fn with_retry_after(self, retry_after: Duration) -> Self {
        *self.retry_after.write() = Some(retry_after);
        self
    }

    pub fn engage(&self) {
        info!("service unavailable valve engaged");
        self.engaged.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        info!("service unavailable valve released");
        self.engaged.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

impl Valve for ServiceUnavailableValve {
    fn name(&self) -> &str {
        "ServiceUnavailableValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError> {
        if !self.is_engaged() {
            return next.invoke(req, res);
        }
        debug!(request_id = %req.request_id(), "rejecting request, service unavailable");
        if let Some(after) = *self.retry_after.read() {
            res.set_header("Retry-After", &after.as_secs().to_string());
        }
        res.send_error(StatusCode::SERVICE_UNAVAILABLE, Some("service unavailable"))
    }
}
