#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brrtvalve::error::{ContainerError, DispatchError};
use brrtvalve::pipeline::{Next, Pipeline, Valve};
use brrtvalve::server::{Request, Response};
use common::Trail;
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records its name and continues
struct Step {
    name: String,
    trail: Trail,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Step {
    fn new(name: &str, trail: &Trail) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            trail: trail.clone(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }
}

impl Valve for Step {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError> {
        self.trail.push(self.name.clone());
        next.invoke(req, res)
    }

    fn start(&self) -> Result<(), ContainerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), ContainerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers 403 and never calls the next valve
struct Deny;

impl Valve for Deny {
    fn invoke(&self, _req: &mut Request, res: &mut Response, _next: Next<'_>) -> Result<(), DispatchError> {
        res.send_error(StatusCode::FORBIDDEN, None)
    }
}

fn as_valve<V: Valve + 'static>(valve: &Arc<V>) -> Arc<dyn Valve> {
    Arc::clone(valve) as Arc<dyn Valve>
}

fn run(pipeline: &Pipeline) -> Response {
    let mut req = Request::get("/");
    let mut res = Response::new();
    pipeline.invoke(&mut req, &mut res).unwrap();
    res
}

#[test]
fn test_valves_run_in_order_with_basic_last() {
    let trail = Trail::new();
    let basic = Step::new("basic", &trail);
    let pipeline = Pipeline::with_basic("c", as_valve(&basic));
    pipeline.add_valve(as_valve(&Step::new("v1", &trail)));
    pipeline.add_valve(as_valve(&Step::new("v2", &trail)));

    run(&pipeline);
    assert_eq!(trail.entries(), vec!["v1", "v2", "basic"]);

    let names: Vec<String> = pipeline.valves().iter().map(|v| v.name().to_string()).collect();
    assert_eq!(names, vec!["v1", "v2", "basic"]);
    assert_eq!(pipeline.first().unwrap().name(), "v1");
    let v2 = pipeline.next_of(&pipeline.first().unwrap()).unwrap();
    assert_eq!(v2.name(), "v2");
    assert_eq!(pipeline.next_of(&v2).unwrap().name(), "basic");
    assert!(pipeline.next_of(&as_valve(&basic)).is_none());
    assert_eq!(pipeline.snapshot().intermediate().len(), 2);
}

#[test]
fn test_first_is_basic_without_intermediate_valves() {
    let trail = Trail::new();
    let pipeline = Pipeline::with_basic("c", as_valve(&Step::new("basic", &trail)));
    assert_eq!(pipeline.first().unwrap().name(), "basic");
}

#[test]
fn test_valve_can_short_circuit() {
    let trail = Trail::new();
    let pipeline = Pipeline::with_basic("c", as_valve(&Step::new("basic", &trail)));
    pipeline.add_valve(as_valve(&Step::new("before", &trail)));
    pipeline.add_valve(Arc::new(Deny));
    pipeline.add_valve(as_valve(&Step::new("after", &trail)));

    let res = run(&pipeline);
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(trail.entries(), vec!["before"]);
}

#[test]
fn test_remove_valve() {
    let trail = Trail::new();
    let basic = as_valve(&Step::new("basic", &trail));
    let pipeline = Pipeline::with_basic("c", Arc::clone(&basic));
    let extra = as_valve(&Step::new("extra", &trail));
    pipeline.add_valve(Arc::clone(&extra));

    assert!(pipeline.remove_valve(&extra).unwrap());
    assert!(!pipeline.remove_valve(&extra).unwrap());
    assert_eq!(
        pipeline.remove_valve(&basic),
        Err(ContainerError::BasicValveRemoval {
            container: "c".to_string()
        })
    );
    run(&pipeline);
    assert_eq!(trail.entries(), vec!["basic"]);
}

#[test]
fn test_set_basic_replaces_and_restarts() {
    let trail = Trail::new();
    let old = Step::new("old", &trail);
    let new = Step::new("new", &trail);
    let pipeline = Pipeline::with_basic("c", as_valve(&old));
    pipeline.add_valve(as_valve(&Step::new("v", &trail)));
    pipeline.start().unwrap();
    assert_eq!(old.starts.load(Ordering::SeqCst), 1);

    pipeline.set_basic(as_valve(&new)).unwrap();
    assert_eq!(new.starts.load(Ordering::SeqCst), 1);
    assert_eq!(old.stops.load(Ordering::SeqCst), 1);
    run(&pipeline);
    assert_eq!(trail.entries(), vec!["v", "new"]);

    // setting the same valve again is a no-op
    pipeline.set_basic(as_valve(&new)).unwrap();
    assert_eq!(new.starts.load(Ordering::SeqCst), 1);

    pipeline.stop();
    assert_eq!(new.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_start_requires_basic_valve() {
    let pipeline = Pipeline::new("bare");
    assert_eq!(
        pipeline.start(),
        Err(ContainerError::NoBasicValve {
            container: "bare".to_string()
        })
    );
    assert!(!pipeline.is_running());

    let mut req = Request::get("/");
    let mut res = Response::new();
    assert!(pipeline.invoke(&mut req, &mut res).is_err());
}

#[test]
fn test_valve_added_to_running_pipeline_is_started() {
    let trail = Trail::new();
    let pipeline = Pipeline::with_basic("c", as_valve(&Step::new("basic", &trail)));
    pipeline.start().unwrap();
    let late = Step::new("late", &trail);
    pipeline.add_valve(as_valve(&late));
    assert_eq!(late.starts.load(Ordering::SeqCst), 1);
    pipeline.remove_valve(&as_valve(&late)).unwrap();
    assert_eq!(late.stops.load(Ordering::SeqCst), 1);
}

/// Removes `victim` from the pipeline while the request is in flight
struct Remover {
    pipeline: Arc<Pipeline>,
    victim: Arc<dyn Valve>,
}

impl Valve for Remover {
    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError> {
        self.pipeline.remove_valve(&self.victim).unwrap();
        next.invoke(req, res)
    }
}

#[test]
fn test_valve_removed_mid_request_still_runs_for_that_request() {
    let trail = Trail::new();
    let pipeline = Arc::new(Pipeline::with_basic("c", as_valve(&Step::new("basic", &trail))));
    let victim = as_valve(&Step::new("victim", &trail));
    pipeline.add_valve(Arc::new(Remover {
        pipeline: Arc::clone(&pipeline),
        victim: Arc::clone(&victim),
    }));
    pipeline.add_valve(Arc::clone(&victim));

    run(&pipeline);
    assert_eq!(trail.entries(), vec!["victim", "basic"]);
    assert_eq!(pipeline.valves().len(), 2);

    trail.clear();
    run(&pipeline);
    assert_eq!(trail.entries(), vec!["basic"]);
}
