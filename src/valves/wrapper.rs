use http::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::send_unavailable;
use crate::container::{Container, Wrapper};
use crate::error::DispatchError;
use crate::filter::{create_filter_chain, DispatcherType, FilterChain};
use crate::pipeline::{Next, Valve};
use crate::server::{ErrorInfo, Request, Response};

/// Basic valve of a [`Wrapper`]: allocates a servlet instance and runs the filter
/// chain for a REQUEST dispatch.
///
/// The chain object is recycled through the request unless security isolation is
/// configured. Failures are recorded on the request (error info, 500) and returned
/// to the host valve, except unavailability, which answers 503/404 directly.
#[derive(Debug, Default)]
pub struct WrapperValve;

fn record_failure(req: &mut Request, res: &mut Response, wrapper: &Wrapper, e: &DispatchError) {
    if req.error_info().is_none() {
        req.set_error_info(ErrorInfo {
            class: e.class(),
            message: e.to_string(),
            servlet_name: Some(wrapper.name().to_string()),
        });
    }
    if !res.is_committed() {
        res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
    res.mark_error();
}

impl Valve for WrapperValve {
    fn name(&self) -> &str {
        "WrapperValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, _next: Next<'_>) -> Result<(), DispatchError> {
        let Some(wrapper) = req.wrapper() else {
            return Err(DispatchError::illegal_state("wrapper valve reached without a mapped wrapper"));
        };
        let started = Instant::now();

        if !wrapper.context().is_some_and(|c| c.is_available()) {
            warn!(request_id = %req.request_id(), wrapper = %wrapper.name(), "context is not available");
            return res.send_error(StatusCode::SERVICE_UNAVAILABLE, Some("context is not available"));
        }
        if wrapper.is_unavailable() {
            debug!(request_id = %req.request_id(), wrapper = %wrapper.name(), "servlet unavailable");
            return send_unavailable(res, wrapper.availability());
        }

        req.set_dispatcher_type(DispatcherType::Request);
        let path = req.request_path();
        req.set_dispatch_path(Some(path));

        let servlet = match wrapper.allocate() {
            Ok(servlet) => servlet,
            Err(DispatchError::Unavailable(u)) => {
                warn!(request_id = %req.request_id(), wrapper = %wrapper.name(), reason = %u, "servlet allocation refused");
                return send_unavailable(res, wrapper.availability());
            }
            Err(e) => {
                error!(request_id = %req.request_id(), wrapper = %wrapper.name(), error = %e, "servlet allocation failed");
                record_failure(req, res, &wrapper, &e);
                wrapper.record_request(started.elapsed(), true);
                return Err(e);
            }
        };

        let mut chain = create_filter_chain(req, &wrapper, Arc::clone(&servlet), true);
        let result = chain.do_filter(req, res);
        chain.release();
        if !wrapper.runtime_config().is_some_and(|c| c.security_isolation) {
            req.set_filter_chain(chain);
        }
        wrapper.deallocate(servlet);

        let result = match result {
            Ok(()) => Ok(()),
            Err(DispatchError::Unavailable(u)) => {
                wrapper.unavailable(&u);
                send_unavailable(res, wrapper.availability())
            }
            Err(e) if e.is_client_abort() => {
                debug!(request_id = %req.request_id(), wrapper = %wrapper.name(), error = %e, "client aborted");
                Err(e)
            }
            Err(e) => {
                error!(request_id = %req.request_id(), wrapper = %wrapper.name(), error = %e, "servlet failed");
                record_failure(req, res, &wrapper, &e);
                Err(e)
            }
        };

        if wrapper.is_permanently_unavailable() {
            wrapper.unload();
        }
        wrapper.record_request(started.elapsed(), result.is_err() || res.is_error());
        result
    }
}
