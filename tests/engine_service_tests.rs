#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtvalve::container::Container;
use brrtvalve::error::{DispatchError, ErrorClass};
use brrtvalve::runtime_config::RuntimeConfig;
use brrtvalve::server::{Request, Response};
use brrtvalve::servlet::servlet_fn;
use common::{Trail, TrailServlet, Tree};
use http::StatusCode;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Sink sharing its bytes with the test
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose peer has gone away
struct BrokenPipe;

impl io::Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }
}

#[test]
fn test_request_reaches_the_mapped_servlet() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    let wrapper = tree.servlet("svc", "/svc/*", TrailServlet::new("svc", &trail));
    tree.start();

    let mut req = Request::get("/app/svc/item?id=7");
    let res = tree.service(&mut req);
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body_string(), "svc");
    assert!(res.is_finished());
    assert_eq!(trail.entries(), vec!["svc REQUEST /svc /item"]);
    assert_eq!(req.context_path(), "/app");
    assert_eq!(req.request_path(), "/svc/item");
    assert_eq!(req.parameter("id"), Some("7"));
    assert_eq!(wrapper.request_count(), 1);
    assert_eq!(wrapper.error_count(), 0);
}

#[test]
fn test_unnormalisable_uri_is_a_bad_request() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();
    assert_eq!(tree.get("/../etc/passwd").status(), StatusCode::BAD_REQUEST);
    assert_eq!(tree.get("relative").status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_unmapped_requests_are_not_found() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();
    assert_eq!(tree.get("/elsewhere").status(), StatusCode::NOT_FOUND);
    assert_eq!(tree.get("/app/other").status(), StatusCode::NOT_FOUND);
    assert_eq!(tree.get("/app/svc").status(), StatusCode::OK);
}

#[test]
fn test_protected_directories_are_hidden() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();
    assert_eq!(tree.get("/app/WEB-INF/web.xml").status(), StatusCode::NOT_FOUND);
    assert_eq!(tree.get("/app/meta-inf/").status(), StatusCode::NOT_FOUND);
    assert_eq!(tree.get("/app/WEB-INFO").status(), StatusCode::OK);
}

#[test]
fn test_non_ascii_paths_are_served() {
    let tree = Tree::new("/app");
    tree.servlet(
        "svc",
        "/",
        servlet_fn(|req, res| {
            let path = req.request_path();
            res.write_str(&path)
        }),
    );
    tree.start();

    // multi-byte characters straddling the protected-directory prefix length
    for path in ["/xxxxxx\u{e9}", "/WEB-IN\u{e9}", "/caf\u{e9}/men\u{fc}", "/\u{65e5}\u{672c}\u{8a9e}"] {
        let res = tree.get(&format!("/app{path}"));
        assert_eq!(res.status(), StatusCode::OK, "{path}");
        assert_eq!(res.body_string(), path);
    }
    assert_eq!(tree.get("/app/WEB-INF/caf\u{e9}").status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_servlet_failure_becomes_500() {
    let tree = Tree::new("/app");
    let wrapper = tree.servlet(
        "svc",
        "/svc",
        servlet_fn(|_req, res| {
            res.write_str("partial")?;
            Err(DispatchError::servlet("database offline"))
        }),
    );
    tree.start();

    let mut req = Request::get("/app/svc");
    let res = tree.service(&mut req);
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let info = req.error_info().unwrap();
    assert_eq!(info.class, ErrorClass::Application);
    assert_eq!(info.message, "database offline");
    assert_eq!(info.servlet_name.as_deref(), Some("svc"));
    assert_eq!(wrapper.error_count(), 1);
}

#[test]
fn test_failure_after_commit_keeps_the_response() {
    let tree = Tree::with_config(
        "/app",
        RuntimeConfig {
            background_delay_secs: 0,
            response_buffer_size: 4,
            ..RuntimeConfig::default()
        },
    );
    tree.servlet(
        "svc",
        "/svc",
        servlet_fn(|_req, res| {
            res.write_str("streamed")?;
            Err(DispatchError::Runtime("late failure".to_string()))
        }),
    );
    tree.start();

    let res = tree.get("/app/svc");
    assert!(res.is_committed());
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.body_string(), "streamed");
}

#[test]
fn test_stopped_context_answers_503() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("ok")));
    tree.start();
    tree.context.stop().unwrap();
    assert_eq!(tree.get("/app/svc").status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_output_reaches_the_sink() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("to the wire")));
    tree.start();

    let sink = SharedSink::default();
    let mut req = Request::get("/app/svc");
    let mut res = Response::new().with_sink(Box::new(sink.clone()));
    tree.engine.service(&mut req, &mut res);
    assert!(res.is_committed());
    assert_eq!(sink.0.lock().as_slice(), b"to the wire");
}

#[test]
fn test_client_abort_is_absorbed() {
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", servlet_fn(|_req, res| res.write_str("lost")));
    tree.start();

    let mut req = Request::get("/app/svc");
    let mut res = Response::new().with_sink(Box::new(BrokenPipe));
    tree.engine.service(&mut req, &mut res);
    assert!(res.is_finished());
}

#[test]
fn test_request_and_response_can_be_recycled() {
    let tree = Tree::new("/app");
    tree.servlet("a", "/a", servlet_fn(|_req, res| res.write_str("a")));
    tree.servlet("b", "/b", servlet_fn(|req, res| res.write_str(req.parameter("q").unwrap_or("b"))));
    tree.start();

    let mut req = Request::get("/app/a");
    let mut res = tree.engine.create_response();
    tree.engine.service(&mut req, &mut res);
    assert_eq!(res.body_string(), "a");

    req.recycle(http::Method::GET, "/app/b?q=again");
    res.recycle();
    tree.engine.service(&mut req, &mut res);
    assert_eq!(res.body_string(), "again");
    assert_eq!(req.servlet_path(), "/b");
}
