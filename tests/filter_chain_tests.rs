#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtvalve::container::Container;
use brrtvalve::error::DispatchError;
use brrtvalve::filter::{
    create_filter_chain, ApplicationFilterConfig, Filter, FilterChain, FilterMap,
};
use brrtvalve::instrumentation::InstanceEventType;
use brrtvalve::runtime_config::RuntimeConfig;
use brrtvalve::server::{Request, Response};
use brrtvalve::servlet::servlet_fn;
use common::{listen, EventLog, Trail, TrailFilter, TrailServlet, Tree};
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PanickingFilter;

impl Filter for PanickingFilter {
    fn do_filter(
        &self,
        _req: &mut Request,
        _res: &mut Response,
        _chain: &mut dyn FilterChain,
    ) -> Result<(), DispatchError> {
        panic!("filter exploded");
    }
}

/// Continues the chain twice
struct DoubleFilter;

impl Filter for DoubleFilter {
    fn do_filter(
        &self,
        req: &mut Request,
        res: &mut Response,
        chain: &mut dyn FilterChain,
    ) -> Result<(), DispatchError> {
        chain.do_filter(req, res)?;
        chain.do_filter(req, res)
    }
}

fn request_for(path: &str) -> Request {
    let mut req = Request::get(path);
    req.set_dispatch_path(Some(path.to_string()));
    req
}

#[test]
fn test_release_is_idempotent() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    let wrapper = tree.servlet("svc", "/svc", TrailServlet::new("svc", &trail));
    tree.filter("f", TrailFilter::new("f", &trail));
    tree.context.add_filter_map(FilterMap::url("f", "/*")).unwrap();
    tree.start();

    let mut req = request_for("/svc");
    let servlet = wrapper.allocate().unwrap();
    let mut chain = create_filter_chain(&mut req, &wrapper, Arc::clone(&servlet), false);
    assert_eq!(chain.filter_names(), vec!["f"]);
    assert!(chain.has_servlet());

    chain.release();
    chain.release();
    assert!(chain.is_empty());
    assert_eq!(chain.position(), 0);
    assert!(!chain.has_servlet());
    assert_eq!(chain.servlet_name(), "");
    wrapper.deallocate(servlet);
}

#[test]
fn test_cursor_advances_per_filter() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    let wrapper = tree.servlet("svc", "/svc", TrailServlet::new("svc", &trail));
    tree.filter("a", TrailFilter::new("a", &trail));
    tree.filter("b", TrailFilter::new("b", &trail));
    tree.context.add_filter_map(FilterMap::url("a", "/*")).unwrap();
    tree.context.add_filter_map(FilterMap::url("b", "/*")).unwrap();
    tree.start();

    let mut req = request_for("/svc");
    let mut res = Response::new();
    let servlet = wrapper.allocate().unwrap();
    let mut chain = create_filter_chain(&mut req, &wrapper, servlet, false);
    chain.do_filter(&mut req, &mut res).unwrap();
    assert_eq!(chain.position(), 2);
    assert_eq!(res.body_string(), "svc");
    assert_eq!(trail.entries(), vec![">a", ">b", "svc REQUEST  -", "<b", "<a"]);
}

#[test]
fn test_servlet_error_is_returned_unchanged() {
    let tree = Tree::new("/app");
    let wrapper = tree.servlet(
        "svc",
        "/svc",
        servlet_fn(|_req, _res| Err(DispatchError::servlet("handler refused"))),
    );
    tree.filter("f", TrailFilter::new("f", &Trail::new()));
    tree.context.add_filter_map(FilterMap::url("f", "/*")).unwrap();
    let log = EventLog::new();
    listen(&wrapper, &log);
    tree.start();

    let mut req = request_for("/svc");
    let mut res = Response::new();
    let mut chain = create_filter_chain(&mut req, &wrapper, wrapper.allocate().unwrap(), false);
    let err = chain.do_filter(&mut req, &mut res).unwrap_err();
    assert!(
        matches!(&err, DispatchError::Servlet { message, source: None } if message == "handler refused")
    );
    assert_eq!(
        log.events(),
        vec![
            "BeforeFilter(f)",
            "BeforeService",
            "AfterService!application",
            "AfterFilter(f)!application",
        ]
    );
}

#[test]
fn test_panics_become_runtime_errors() {
    let tree = Tree::new("/app");
    let wrapper = tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("unreachable")));
    tree.filter("boom", Arc::new(PanickingFilter));
    tree.context.add_filter_map(FilterMap::url("boom", "/svc")).unwrap();
    let log = EventLog::new();
    listen(&wrapper, &log);
    tree.start();

    let mut req = request_for("/svc");
    let mut res = Response::new();
    let mut chain = create_filter_chain(&mut req, &wrapper, wrapper.allocate().unwrap(), false);
    let err = chain.do_filter(&mut req, &mut res).unwrap_err();
    assert!(matches!(&err, DispatchError::Runtime(m) if m == "filter exploded"));
    assert_eq!(log.events(), vec!["BeforeFilter(boom)", "AfterFilter(boom)!runtime"]);
}

#[test]
fn test_panicking_servlet_answers_500_through_engine() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, _res| panic!("servlet exploded")));
    tree.start();

    let res = tree.get("/app/svc");
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_chain_reentry_runs_servlet_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let tree = Tree::new("/app");
    tree.servlet(
        "svc",
        "/svc",
        servlet_fn(move |_req, res| {
            counter.fetch_add(1, Ordering::SeqCst);
            res.write_str("x")
        }),
    );
    tree.filter("twice", Arc::new(DoubleFilter));
    tree.context.add_filter_map(FilterMap::url("twice", "/*")).unwrap();
    tree.start();

    let res = tree.get("/app/svc");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(res.body_string(), "xx");
}

#[test]
fn test_before_and_after_events_pair_up() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    let wrapper = tree.servlet("svc", "/svc", TrailServlet::new("svc", &trail));
    tree.filter("a", TrailFilter::new("a", &trail));
    tree.filter("b", TrailFilter::new("b", &trail));
    tree.context.add_filter_map(FilterMap::url("a", "/*")).unwrap();
    tree.context.add_filter_map(FilterMap::servlet("b", "svc")).unwrap();
    let log = EventLog::new();
    listen(&wrapper, &log);
    tree.start();

    tree.get("/app/svc");
    assert_eq!(
        log.count(InstanceEventType::BeforeFilter),
        log.count(InstanceEventType::AfterFilter)
    );
    assert_eq!(log.count(InstanceEventType::BeforeFilter), 2);
    assert_eq!(
        log.count(InstanceEventType::BeforeService),
        log.count(InstanceEventType::AfterService)
    );
}

#[test]
fn test_chain_is_pooled_on_the_request() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();

    let mut req = Request::get("/app/svc");
    let res = tree.service(&mut req);
    assert_eq!(res.body_string(), "ok");
    assert!(req.has_pooled_filter_chain());

    req.recycle(http::Method::GET, "/app/svc");
    assert!(req.has_pooled_filter_chain());
    let res = tree.service(&mut req);
    assert_eq!(res.body_string(), "ok");
}

#[test]
fn test_security_isolation_disables_pooling() {
    let tree = Tree::with_config(
        "/app",
        RuntimeConfig {
            background_delay_secs: 0,
            security_isolation: true,
            ..RuntimeConfig::default()
        },
    );
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();

    let mut req = Request::get("/app/svc");
    let res = tree.service(&mut req);
    assert_eq!(res.body_string(), "ok");
    assert!(!req.has_pooled_filter_chain());
}

#[test]
fn test_stopped_context_destroys_filters() {
    struct Counted(Arc<AtomicUsize>, Arc<AtomicUsize>);

    impl Filter for Counted {
        fn init(&self, _config: &ApplicationFilterConfig) -> Result<(), DispatchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn do_filter(
            &self,
            req: &mut Request,
            res: &mut Response,
            chain: &mut dyn FilterChain,
        ) -> Result<(), DispatchError> {
            chain.do_filter(req, res)
        }

        fn destroy(&self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    let inits = Arc::new(AtomicUsize::new(0));
    let destroys = Arc::new(AtomicUsize::new(0));
    let tree = Tree::new("/app");
    tree.filter("c", Arc::new(Counted(Arc::clone(&inits), Arc::clone(&destroys))));
    tree.start();
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert!(tree.context.find_filter_config("c").is_some());

    tree.engine.stop().unwrap();
    assert_eq!(destroys.load(Ordering::SeqCst), 1);
    assert!(tree.context.filter_registry().is_none());
}
