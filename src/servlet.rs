//! Request handlers (servlets) and their configuration.
//!
//! A [`Servlet`] is the target of a request: the last step of a filter chain. The
//! owning [`Wrapper`](crate::container::Wrapper) creates instances through a
//! [`ServletFactory`], calls [`Servlet::init`] once per instance and
//! [`Servlet::destroy`] when it unloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::DispatchError;
use crate::server::{Request, Response};

/// A request handler.
///
/// Implementations must tolerate concurrent `service` calls unless
/// [`is_single_threaded`](Servlet::is_single_threaded) returns `true`, in which case
/// the wrapper pools instances and hands each one to a single request at a time.
pub trait Servlet: Send + Sync {
    fn init(&self, _config: &ServletConfig) -> Result<(), DispatchError> {
        Ok(())
    }

    fn service(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError>;

    fn destroy(&self) {}

    fn is_single_threaded(&self) -> bool {
        false
    }
}

/// Creates servlet instances for a wrapper
pub type ServletFactory = Arc<dyn Fn() -> Result<Arc<dyn Servlet>, DispatchError> + Send + Sync>;

/// Name and init parameters handed to [`Servlet::init`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServletConfig {
    pub servlet_name: String,
    pub init_params: BTreeMap<String, String>,
}

impl ServletConfig {
    #[must_use]
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}

/// Adapter turning a closure into a [`Servlet`]
pub struct FnServlet<F>(F);

impl<F> Servlet for FnServlet<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync,
{
    fn service(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        (self.0)(req, res)
    }
}

/// Wrap a closure as a shareable servlet.
pub fn servlet_fn<F>(f: F) -> Arc<dyn Servlet>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    Arc::new(FnServlet(f))
}
