#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtvalve::error::ContainerError;
use brrtvalve::filter::{
    match_filter_maps, matches_url, DispatchMask, DispatcherType, FilterMap,
};
use common::{BlockingFilter, Trail, TrailFilter, TrailServlet, Tree};
use std::sync::Arc;

#[test]
fn test_request_only_mapping_skips_include_dispatch() {
    let maps = vec![FilterMap::url("f", "/*")];
    assert!(match_filter_maps(&maps, DispatcherType::Include, Some("/x"), Some("s")).is_empty());
    assert_eq!(
        match_filter_maps(&maps, DispatcherType::Request, Some("/x"), Some("s")),
        vec!["f"]
    );
}

#[test]
fn test_extension_pattern() {
    assert!(matches_url("*.jsp", "/a/b/c.jsp"));
    assert!(!matches_url("*.jsp", "/a/b.jsp/c"));
    assert!(!matches_url("*.jsp", "/a/b."));
}

#[test]
fn test_matching_is_deterministic() {
    let maps = vec![
        FilterMap::url("a", "/*"),
        FilterMap::servlet("b", "*"),
        FilterMap::url("c", "*.do"),
        FilterMap::url("a", "/x/*"),
        FilterMap::servlet("d", "svc"),
    ];
    let first = match_filter_maps(&maps, DispatcherType::Request, Some("/x/y.do"), Some("svc"));
    for _ in 0..10 {
        assert_eq!(
            match_filter_maps(&maps, DispatcherType::Request, Some("/x/y.do"), Some("svc")),
            first
        );
    }
    assert_eq!(first, vec!["a", "c", "b", "d"]);
}

#[test]
fn test_every_dispatch_type_bit() {
    let maps = vec![
        FilterMap::url("error", "/*").with_dispatch(DispatchMask::ERROR),
        FilterMap::url("forward", "/*").with_dispatch(DispatchMask::FORWARD),
        FilterMap::url("include", "/*").with_dispatch(DispatchMask::INCLUDE),
        FilterMap::url("request", "/*"),
        FilterMap::url("all", "/*").with_dispatch(DispatchMask::all()),
    ];
    for (t, expected) in [
        (DispatcherType::Error, "error"),
        (DispatcherType::Forward, "forward"),
        (DispatcherType::Include, "include"),
        (DispatcherType::Request, "request"),
    ] {
        assert_eq!(
            match_filter_maps(&maps, t, Some("/p"), None),
            vec![expected, "all"],
            "dispatch type {t}"
        );
    }
}

#[test]
fn test_chain_order_follows_declaration_order() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc/*", TrailServlet::new("svc", &trail));
    for name in ["one", "two", "three", "named"] {
        tree.filter(name, TrailFilter::new(name, &trail));
    }
    tree.context
        .add_filter_map(FilterMap::servlet("named", "svc"))
        .unwrap();
    tree.context.add_filter_map(FilterMap::url("two", "/svc/*")).unwrap();
    tree.context.add_filter_map(FilterMap::url("three", "*.txt")).unwrap();
    tree.context
        .add_filter_map_before(FilterMap::url("one", "/*"))
        .unwrap();
    tree.start();

    let res = tree.get("/app/svc/readme.txt");
    assert_eq!(res.body_string(), "svc");
    assert_eq!(
        trail.entries(),
        vec![
            ">one",
            ">two",
            ">three",
            ">named",
            "svc REQUEST /svc /readme.txt",
            "<named",
            "<three",
            "<two",
            "<one",
        ]
    );
}

#[test]
fn test_filter_listed_twice_runs_once() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", TrailServlet::new("svc", &trail));
    tree.filter("f", TrailFilter::new("f", &trail));
    tree.context.add_filter_map(FilterMap::url("f", "/*")).unwrap();
    tree.context.add_filter_map(FilterMap::url("f", "/svc")).unwrap();
    tree.context.add_filter_map(FilterMap::servlet("f", "*")).unwrap();
    tree.start();

    tree.get("/app/svc");
    assert_eq!(trail.entries(), vec![">f", "svc REQUEST /svc -", "<f"]);
}

#[test]
fn test_filter_can_short_circuit() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    tree.servlet("svc", "/svc", TrailServlet::new("svc", &trail));
    tree.filter("block", Arc::new(BlockingFilter { body: "blocked" }));
    tree.context.add_filter_map(FilterMap::url("block", "/svc")).unwrap();
    tree.start();

    let res = tree.get("/app/svc");
    assert_eq!(res.body_string(), "blocked");
    assert!(trail.entries().is_empty());
}

#[test]
fn test_unmatched_path_gets_no_filters() {
    let trail = Trail::new();
    let tree = Tree::new("/app");
    tree.servlet("svc", "/", TrailServlet::new("svc", &trail));
    tree.filter("f", TrailFilter::new("f", &trail));
    tree.context.add_filter_map(FilterMap::url("f", "/admin/*")).unwrap();
    tree.context.add_filter_map(FilterMap::servlet("f", "other")).unwrap();
    tree.start();

    tree.get("/app/administrator");
    assert_eq!(trail.entries(), vec!["svc REQUEST /administrator -"]);
}

#[test]
fn test_filter_map_validation() {
    let tree = Tree::new("/app");
    assert!(matches!(
        tree.context.add_filter_map(FilterMap::url("missing", "/*")),
        Err(ContainerError::UnknownFilter { .. })
    ));
    tree.filter("f", Arc::new(BlockingFilter { body: "" }));
    assert!(matches!(
        tree.context.add_filter_map(FilterMap::url("f", "relative")),
        Err(ContainerError::InvalidFilterMap { .. })
    ));
    assert!(tree.context.filter_maps().is_empty());

    let map = FilterMap::url("f", "/*");
    tree.context.add_filter_map(map.clone()).unwrap();
    assert_eq!(tree.context.filter_maps().len(), 1);
    assert!(tree.context.remove_filter_map(&map));
    assert!(!tree.context.remove_filter_map(&map));
}
