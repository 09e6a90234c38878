use std::time::Instant;

use tracing::{field, info_span};

use crate::error::DispatchError;
use crate::pipeline::{Next, Valve};
use crate::server::{Request, Response};

/// Wraps the rest of the pipeline in a `request` span carrying method, URI, request
/// id, status and latency.
#[derive(Debug, Default)]
pub struct TracingValve;

impl Valve for TracingValve {
    fn name(&self) -> &str {
        "TracingValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError> {
        let span = info_span!(
            "request",
            request_id = %req.request_id(),
            method = %req.method(),
            uri = %req.request_uri(),
            status = field::Empty,
            latency_ms = field::Empty,
        );
        let _entered = span.enter();
        let started = Instant::now();
        let result = next.invoke(req, res);
        span.record("status", res.status().as_u16());
        span.record(
            "latency_ms",
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        result
    }
}
