//! # Valves Module
//!
//! Concrete [`Valve`](crate::pipeline::Valve) implementations.
//!
//! ## Basic Valves
//!
//! Every container level ends its pipeline with one of these:
//!
//! - [`EngineValve`] - hands the request to the mapped host (400 when none)
//! - [`HostValve`] - runs the context pipeline, records escaped failures and renders
//!   error pages
//! - [`ContextValve`] - rejects `/WEB-INF` and `/META-INF`, hands the request to the
//!   mapped wrapper (404 when none or unavailable)
//! - [`WrapperValve`] - allocates the servlet and runs the filter chain
//!
//! ## Additional Valves
//!
//! - [`MetricsValve`] - request counts, latency and per-status counters
//! - [`TracingValve`] - a `request` span around the rest of the pipeline
//! - [`ServiceUnavailableValve`] - short-circuits with 503 while engaged
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brrtvalve::container::Container;
//! use brrtvalve::valves::{MetricsValve, TracingValve};
//!
//! let metrics = Arc::new(MetricsValve::new());
//! engine.add_valve(Arc::new(TracingValve));
//! engine.add_valve(metrics.clone());
//! ```

mod error_page;
mod metrics;
mod standard;
mod tracing;
mod unavailable;
mod wrapper;

pub use metrics::MetricsValve;
pub use standard::{ContextValve, EngineValve, HostValve};
pub use tracing::TracingValve;
pub use unavailable::ServiceUnavailableValve;
pub use wrapper::WrapperValve;

use http::StatusCode;

use crate::container::Availability;
use crate::error::DispatchError;
use crate::server::Response;

/// Answer for an unavailable servlet: 404 when permanent, else 503 with a
/// `Retry-After` header. Nothing happens once the response is committed.
pub(crate) fn send_unavailable(res: &mut Response, availability: Availability) -> Result<(), DispatchError> {
    if res.is_committed() {
        return Ok(());
    }
    match availability {
        Availability::Permanent => {
            res.send_error(StatusCode::NOT_FOUND, Some("servlet is permanently unavailable"))
        }
        Availability::Temporary(left) => {
            res.set_header("Retry-After", &left.as_secs().max(1).to_string());
            res.send_error(StatusCode::SERVICE_UNAVAILABLE, Some("servlet is currently unavailable"))
        }
        Availability::Available => {
            res.send_error(StatusCode::SERVICE_UNAVAILABLE, Some("servlet is currently unavailable"))
        }
    }
}
