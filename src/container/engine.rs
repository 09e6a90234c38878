use http::StatusCode;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use super::{ChildMap, Container, ContainerCore, ContainerKind, Host};
use crate::error::ContainerError;
use crate::mapper::map_request;
use crate::runtime_config::RuntimeConfig;
use crate::server::{Request, Response};
use crate::valves::EngineValve;

/// Root of the container tree.
///
/// Owns the runtime configuration every descendant inherits and, unless the
/// configured delay is `<= 0`, the background thread servicing the whole tree.
pub struct Engine {
    core: ContainerCore,
    hosts: ChildMap<Host>,
    default_host: RwLock<Option<String>>,
    config: Arc<RuntimeConfig>,
    this: Weak<Engine>,
}

impl Engine {
    /// Engine with default configuration
    pub fn new(name: &str) -> Arc<Engine> {
        Self::with_config(RuntimeConfig {
            engine_name: name.to_string(),
            ..RuntimeConfig::default()
        })
    }

    pub fn with_config(config: RuntimeConfig) -> Arc<Engine> {
        let config = Arc::new(config);
        let engine = Arc::new_cyclic(|weak: &Weak<Engine>| {
            let this = Weak::clone(weak);
            let container: Weak<dyn Container> = this;
            Engine {
                core: ContainerCore::new(
                    &config.engine_name,
                    ContainerKind::Engine,
                    Arc::new(EngineValve),
                    container,
                ),
                hosts: ChildMap::default(),
                default_host: RwLock::new(Some(config.default_host.to_ascii_lowercase())),
                config: Arc::clone(&config),
                this: Weak::clone(weak),
            }
        });
        engine
            .core
            .collaborators()
            .set_runtime_config(Some(Arc::clone(&config)));
        engine
            .core
            .set_background_delay(config.background_delay_secs);
        engine
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn add_host(&self, host: Arc<Host>) -> Result<(), ContainerError> {
        let Some(this) = self.this.upgrade() else {
            return Err(ContainerError::lifecycle(self.name(), "engine is being dropped"));
        };
        self.hosts.add(self, host, |h| h.attach(&this))
    }

    pub fn remove_host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts
            .remove(self, &name.to_ascii_lowercase(), Host::detach)
    }

    #[must_use]
    pub fn find_host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.get(&name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.list()
    }

    /// Host used when no name or alias matches the request
    #[must_use]
    pub fn default_host(&self) -> Option<String> {
        self.default_host.read().clone()
    }

    pub fn set_default_host(&self, name: Option<&str>) {
        *self.default_host.write() = name.map(str::to_ascii_lowercase);
    }

    /// A response sized by the configured buffer
    #[must_use]
    pub fn create_response(&self) -> Response {
        Response::with_buffer_size(self.config.response_buffer_size)
    }

    /// Map and process one request end to end.
    ///
    /// Failures escaping the pipeline become a 500 when the response is still
    /// uncommitted; the response is always finished.
    pub fn service(&self, req: &mut Request, res: &mut Response) {
        if !map_request(self, req) {
            warn!(request_id = %req.request_id(), uri = %req.request_uri(), "request URI cannot be normalised");
            res.set_status(StatusCode::BAD_REQUEST);
        } else if let Err(e) = self.pipeline().invoke(req, res) {
            if e.is_client_abort() {
                debug!(request_id = %req.request_id(), error = %e, "client aborted");
            } else {
                error!(request_id = %req.request_id(), error = %e, "request failed");
            }
            if !res.is_committed() && res.reset().is_ok() {
                res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        if let Err(e) = res.finish() {
            debug!(request_id = %req.request_id(), error = %e, "response finish failed");
        }
    }
}

impl Container for Engine {
    fn core(&self) -> &ContainerCore {
        &self.core
    }

    fn parent_container(&self) -> Option<Arc<dyn Container>> {
        None
    }

    fn child_containers(&self) -> Vec<Arc<dyn Container>> {
        self.hosts.as_dyn()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("default_host", &self.default_host())
            .field("hosts", &self.hosts)
            .finish()
    }
}
