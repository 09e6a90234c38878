#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;
mod tracing_util;

use brrtvalve::container::Container;
use brrtvalve::error::DispatchError;
use brrtvalve::pipeline::Valve;
use brrtvalve::servlet::servlet_fn;
use brrtvalve::valves::{MetricsValve, ServiceUnavailableValve, TracingValve};
use common::Tree;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_util::TestTracing;

fn tree() -> Tree {
    let tree = Tree::new("/app");
    tree.servlet("ok", "/ok", servlet_fn(|_req, res| res.write_str("ok")));
    tree.servlet(
        "teapot",
        "/teapot",
        servlet_fn(|_req, res| res.send_error(StatusCode::IM_A_TEAPOT, None)),
    );
    tree.servlet(
        "broken",
        "/broken",
        servlet_fn(|_req, _res| Err(DispatchError::servlet("nope"))),
    );
    tree
}

#[test]
fn test_metrics_valve_counts_requests_and_statuses() {
    let tree = tree();
    let metrics = Arc::new(MetricsValve::new());
    tree.engine.add_valve(Arc::clone(&metrics) as Arc<dyn Valve>);
    tree.start();

    for uri in ["/app/ok", "/app/ok", "/app/teapot", "/app/broken", "/app/missing"] {
        tree.get(uri);
    }

    assert_eq!(metrics.request_count(), 5);
    assert_eq!(metrics.status_count(StatusCode::OK), 2);
    assert_eq!(metrics.status_count(StatusCode::IM_A_TEAPOT), 1);
    assert_eq!(metrics.status_count(StatusCode::INTERNAL_SERVER_ERROR), 1);
    assert_eq!(metrics.status_count(StatusCode::NOT_FOUND), 1);
    assert_eq!(
        metrics.status_counts(),
        vec![(200, 2), (404, 1), (418, 1), (500, 1)]
    );
    // the host valve absorbs handler failures, so the engine pipeline sees none
    assert_eq!(metrics.failure_count(), 0);
    assert!(metrics.max_latency() >= metrics.average_latency());
}

#[test]
fn test_metrics_valve_on_context_sees_failures() {
    let tree = tree();
    let metrics = Arc::new(MetricsValve::new());
    tree.context.add_valve(Arc::clone(&metrics) as Arc<dyn Valve>);
    tree.start();

    tree.get("/app/broken");
    tree.get("/app/ok");
    assert_eq!(metrics.request_count(), 2);
    assert_eq!(metrics.failure_count(), 1);
    assert_eq!(metrics.status_count(StatusCode::INTERNAL_SERVER_ERROR), 1);
}

#[test]
fn test_average_latency_is_zero_without_requests() {
    let metrics = MetricsValve::new();
    assert_eq!(metrics.average_latency(), Duration::ZERO);
    assert!(metrics.status_counts().is_empty());
}

#[test]
fn test_service_unavailable_valve_short_circuits() {
    let tree = tree();
    let gate = Arc::new(
        ServiceUnavailableValve::new(true).with_retry_after(Duration::from_secs(120)),
    );
    tree.host.add_valve(Arc::clone(&gate) as Arc<dyn Valve>);
    tree.start();

    let res = tree.get("/app/ok");
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.header("Retry-After"), Some("120"));
    assert!(res.body_string().is_empty());

    gate.release();
    assert!(!gate.is_engaged());
    let res = tree.get("/app/ok");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body_string(), "ok");

    gate.engage();
    assert_eq!(tree.get("/app/ok").status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_tracing_valve_records_a_request_span() {
    let tracing = TestTracing::init();
    let tree = tree();
    tree.engine.add_valve(Arc::new(TracingValve));
    tree.start();

    tree.get("/app/teapot?x=1");

    let spans = tracing.spans_named("request");
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert!(span.closed);
    assert_eq!(span.fields.get("method").map(String::as_str), Some("GET"));
    assert_eq!(span.fields.get("uri").map(String::as_str), Some("/app/teapot"));
    assert_eq!(span.fields.get("status").map(String::as_str), Some("418"));
    assert!(span.fields.contains_key("request_id"));
    assert!(span.fields.contains_key("latency_ms"));
}

#[test]
fn test_tracing_valve_propagates_request_id_header() {
    let tracing = TestTracing::init();
    let tree = tree();
    tree.engine.add_valve(Arc::new(TracingValve));
    tree.start();

    let id = ulid::Ulid::new().to_string();
    let mut req = brrtvalve::server::Request::get("/app/ok").with_header("X-Request-Id", &id);
    tree.service(&mut req);

    let spans = tracing.spans_named("request");
    assert_eq!(spans[0].fields.get("request_id"), Some(&id));
}
