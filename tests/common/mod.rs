#![allow(dead_code)]

//! Shared fixtures for the integration tests: a small container tree, recording
//! filters and servlets, and an instance-event log.

use brrtvalve::container::{Container, Context, Engine, Host, Wrapper};
use brrtvalve::error::DispatchError;
use brrtvalve::filter::{Filter, FilterChain, FilterDef};
use brrtvalve::instrumentation::{InstanceEvent, InstanceEventType, InstanceListener};
use brrtvalve::runtime_config::RuntimeConfig;
use brrtvalve::server::{Request, Response};
use brrtvalve::servlet::Servlet;
use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered record of what ran, shared between fixtures and assertions
#[derive(Clone, Default)]
pub struct Trail(Arc<Mutex<Vec<String>>>);

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Engine `engine` with host `localhost` and one context, not started.
pub struct Tree {
    pub engine: Arc<Engine>,
    pub host: Arc<Host>,
    pub context: Arc<Context>,
}

impl Tree {
    pub fn new(context_path: &str) -> Self {
        Self::with_config(
            context_path,
            RuntimeConfig {
                engine_name: "engine".to_string(),
                background_delay_secs: 0,
                ..RuntimeConfig::default()
            },
        )
    }

    pub fn with_config(context_path: &str, config: RuntimeConfig) -> Self {
        let engine = Engine::with_config(config);
        let host = Host::new("localhost");
        let context = Context::new(context_path);
        host.add_context(Arc::clone(&context)).unwrap();
        engine.add_host(Arc::clone(&host)).unwrap();
        Self {
            engine,
            host,
            context,
        }
    }

    /// Register `servlet` as wrapper `name`, mapped to `pattern`
    pub fn servlet(&self, name: &str, pattern: &str, servlet: Arc<dyn Servlet>) -> Arc<Wrapper> {
        let wrapper = Wrapper::with_servlet(name, servlet);
        self.context.add_wrapper(Arc::clone(&wrapper)).unwrap();
        self.context.add_servlet_mapping(pattern, name).unwrap();
        wrapper
    }

    /// Declare `filter` under `name`
    pub fn filter(&self, name: &str, filter: Arc<dyn Filter>) {
        self.context.add_filter_def(FilterDef::new(name, filter));
    }

    pub fn start(&self) {
        self.engine.start().unwrap();
    }

    /// Run `uri` through the engine
    pub fn get(&self, uri: &str) -> Response {
        let mut req = Request::get(uri);
        self.service(&mut req)
    }

    pub fn service(&self, req: &mut Request) -> Response {
        let mut res = self.engine.create_response();
        self.engine.service(req, &mut res);
        res
    }
}

/// Records `>name` before continuing the chain and `<name` afterwards.
pub struct TrailFilter {
    name: String,
    trail: Trail,
}

impl TrailFilter {
    pub fn new(name: &str, trail: &Trail) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            trail: trail.clone(),
        })
    }
}

impl Filter for TrailFilter {
    fn do_filter(
        &self,
        req: &mut Request,
        res: &mut Response,
        chain: &mut dyn FilterChain,
    ) -> Result<(), DispatchError> {
        self.trail.push(format!(">{}", self.name));
        let result = chain.do_filter(req, res);
        self.trail.push(format!("<{}", self.name));
        result
    }
}

/// Answers on its own and never continues the chain
pub struct BlockingFilter {
    pub body: &'static str,
}

impl Filter for BlockingFilter {
    fn do_filter(
        &self,
        _req: &mut Request,
        res: &mut Response,
        _chain: &mut dyn FilterChain,
    ) -> Result<(), DispatchError> {
        res.write_str(self.body)
    }
}

/// Writes its name into the body and records the request view it was called with.
pub struct TrailServlet {
    name: String,
    trail: Trail,
}

impl TrailServlet {
    pub fn new(name: &str, trail: &Trail) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            trail: trail.clone(),
        })
    }
}

impl Servlet for TrailServlet {
    fn service(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        self.trail.push(format!(
            "{} {} {} {}",
            self.name,
            req.dispatcher_type(),
            req.servlet_path(),
            req.path_info().unwrap_or("-"),
        ));
        res.write_str(&self.name)
    }
}

/// Records every instance event as `Type` or `Type(filter)`, with `!class` on errors
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: InstanceEventType) -> usize {
        let name = format!("{event_type:?}");
        self.events
            .lock()
            .iter()
            .filter(|e| e.split(['(', '!']).next() == Some(name.as_str()))
            .count()
    }
}

impl InstanceListener for EventLog {
    fn instance_event(&self, event: &InstanceEvent<'_>) {
        let mut entry = format!("{:?}", event.event_type);
        if let Some(filter) = event.filter {
            entry.push_str(&format!("({filter})"));
        }
        if let Some(class) = event.error {
            entry.push_str(&format!("!{class}"));
        }
        self.events.lock().push(entry);
    }
}

/// Attach `log` to `wrapper`
pub fn listen(wrapper: &Wrapper, log: &Arc<EventLog>) {
    let listener: Arc<dyn InstanceListener> = Arc::clone(log) as Arc<dyn InstanceListener>;
    wrapper.add_instance_listener(listener);
}
