use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::container::{bind_loader, Container, Context, Wrapper};
use crate::decorator::attributes::{Marker, FORWARD_REQUEST_URI};
use crate::decorator::{DispatchedRequest, LayerId};
use crate::error::DispatchError;
use crate::filter::{create_filter_chain, DispatcherType, FilterChain};
use crate::instrumentation::InstanceEventType;
use crate::server::{Request, Response};
use crate::valves::send_unavailable;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Addressed by wrapper name; the caller's paths are kept
    Named,
    Path {
        request_uri: String,
        servlet_path: String,
        path_info: Option<String>,
        query_string: Option<String>,
    },
}

/// Forward/include target within one context.
#[derive(Clone)]
pub struct RequestDispatcher {
    context: Arc<Context>,
    wrapper: Arc<Wrapper>,
    target: Target,
}

impl RequestDispatcher {
    pub(crate) fn for_path(
        context: Arc<Context>,
        wrapper: Arc<Wrapper>,
        request_uri: String,
        servlet_path: String,
        path_info: Option<String>,
        query_string: Option<String>,
    ) -> Self {
        Self {
            context,
            wrapper,
            target: Target::Path {
                request_uri,
                servlet_path,
                path_info,
                query_string,
            },
        }
    }

    pub(crate) fn named(context: Arc<Context>, wrapper: Arc<Wrapper>) -> Self {
        Self {
            context,
            wrapper,
            target: Target::Named,
        }
    }

    #[must_use]
    pub fn wrapper(&self) -> &Arc<Wrapper> {
        &self.wrapper
    }

    #[must_use]
    pub fn is_named(&self) -> bool {
        self.target == Target::Named
    }

    /// Full target URI for path dispatchers
    #[must_use]
    pub fn request_uri(&self) -> Option<&str> {
        match &self.target {
            Target::Named => None,
            Target::Path { request_uri, .. } => Some(request_uri),
        }
    }

    #[must_use]
    pub fn servlet_path(&self) -> Option<&str> {
        match &self.target {
            Target::Named => None,
            Target::Path { servlet_path, .. } => Some(servlet_path),
        }
    }

    #[must_use]
    pub fn path_info(&self) -> Option<&str> {
        match &self.target {
            Target::Path { path_info, .. } => path_info.as_deref(),
            Target::Named => None,
        }
    }

    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        match &self.target {
            Target::Path { query_string, .. } => query_string.as_deref(),
            Target::Named => None,
        }
    }

    /// Servlet path plus path info of a path target
    fn combined_path(&self) -> Option<String> {
        match &self.target {
            Target::Named => None,
            Target::Path {
                servlet_path,
                path_info,
                ..
            } => {
                let mut path = servlet_path.clone();
                if let Some(info) = path_info {
                    path.push_str(info);
                }
                Some(path)
            }
        }
    }

    /// Hand the request over to the target.
    ///
    /// An ERROR dispatch stays ERROR; anything else becomes FORWARD.
    pub fn forward(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        if res.is_committed() {
            return Err(DispatchError::illegal_state(
                "cannot forward after response has been committed",
            ));
        }
        res.reset_buffer()?;

        let dispatcher_type = match req.dispatcher_type() {
            DispatcherType::Error => DispatcherType::Error,
            _ => DispatcherType::Forward,
        };
        let mut layer = req.snapshot_view(dispatcher_type);
        if let Target::Path {
            request_uri,
            servlet_path,
            path_info,
            query_string,
        } = &self.target
        {
            if !req.has_attribute(FORWARD_REQUEST_URI) {
                layer.set_special_str(Marker::ForwardRequestUri, Some(req.request_uri()));
                layer.set_special_str(Marker::ForwardContextPath, Some(req.context_path()));
                layer.set_special_str(Marker::ForwardServletPath, Some(req.servlet_path()));
                layer.set_special_str(Marker::ForwardPathInfo, req.path_info());
                layer.set_special_str(Marker::ForwardQueryString, req.query_string());
            }
            layer.request_uri.clone_from(request_uri);
            layer.context_path = self.context.path().to_string();
            layer.servlet_path.clone_from(servlet_path);
            layer.path_info.clone_from(path_info);
            if let Some(query) = query_string {
                layer.query_string = Some(query.clone());
                layer.set_query_params(query);
            }
        }
        layer.dispatch_path = self.combined_path();

        debug!(
            request_id = %req.request_id(),
            target = %self.wrapper.name(),
            dispatcher_type = %dispatcher_type,
            "forward"
        );
        let response_layer = res.insert_dispatch_layer(false);
        self.invoke(req, res, layer, response_layer)?;

        // An unreported error stays uncommitted for error-page processing; suspending
        // still closes it to the caller's writes.
        if res.is_error() && !res.is_error_reported() {
            res.set_suspended(true);
        } else if let Err(e) = res.finish() {
            debug!(request_id = %req.request_id(), error = %e, "closing response after forward failed");
        }
        Ok(())
    }

    /// Run the target and append its output to the current response.
    pub fn include(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let mut layer = req.snapshot_view(DispatcherType::Include);
        if let Target::Path {
            request_uri,
            servlet_path,
            path_info,
            query_string,
        } = &self.target
        {
            layer.set_special_str(Marker::IncludeRequestUri, Some(request_uri));
            layer.set_special_str(Marker::IncludeContextPath, Some(self.context.path()));
            layer.set_special_str(Marker::IncludeServletPath, Some(servlet_path));
            layer.set_special_str(Marker::IncludePathInfo, path_info.as_deref());
            layer.set_special_str(Marker::IncludeQueryString, query_string.as_deref());
            if let Some(query) = query_string {
                layer.set_query_params(query);
            }
        }
        layer.dispatch_path = self.combined_path();

        debug!(request_id = %req.request_id(), target = %self.wrapper.name(), "include");
        let response_layer = res.insert_dispatch_layer(true);
        self.invoke(req, res, layer, response_layer)
    }

    /// Shared invocation. Installs `layer`, runs the target, and removes `layer` and
    /// `response_layer` again whatever the outcome.
    fn invoke(
        &self,
        req: &mut Request,
        res: &mut Response,
        layer: DispatchedRequest,
        response_layer: LayerId,
    ) -> Result<(), DispatchError> {
        let request_layer = req.insert_dispatch_layer(layer);
        let _binding = bind_loader(self.context.loader());
        let started = Instant::now();

        let result = self.run_target(req, res);

        req.remove_layer(request_layer);
        res.remove_layer(response_layer);
        if let Err(e) = &result {
            if e.is_client_abort() {
                debug!(request_id = %req.request_id(), wrapper = %self.wrapper.name(), error = %e, "client aborted during dispatch");
            } else {
                error!(request_id = %req.request_id(), wrapper = %self.wrapper.name(), error = %e, "dispatch target failed");
            }
        }
        debug!(
            request_id = %req.request_id(),
            wrapper = %self.wrapper.name(),
            latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "dispatch finished"
        );
        result
    }

    fn run_target(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let wrapper = &self.wrapper;
        if wrapper.is_unavailable() {
            warn!(request_id = %req.request_id(), wrapper = %wrapper.name(), "dispatch target unavailable");
            return send_unavailable(res, wrapper.availability());
        }

        let servlet = match wrapper.allocate() {
            Ok(servlet) => servlet,
            Err(DispatchError::Unavailable(u)) => {
                warn!(request_id = %req.request_id(), wrapper = %wrapper.name(), reason = %u, "dispatch target became unavailable");
                return send_unavailable(res, wrapper.availability());
            }
            Err(e) => return Err(e),
        };

        let support = wrapper.instance_support();
        support.fire(InstanceEventType::BeforeDispatch, None, None);
        let mut chain = create_filter_chain(req, wrapper, Arc::clone(&servlet), false);
        let result = chain.do_filter(req, res);
        chain.release();
        support.fire(
            InstanceEventType::AfterDispatch,
            None,
            result.as_ref().err().map(DispatchError::class),
        );
        if let Err(DispatchError::Unavailable(u)) = &result {
            wrapper.unavailable(u);
        }
        wrapper.deallocate(servlet);
        result
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("context", &self.context.path())
            .field("wrapper", &self.wrapper.name())
            .field("target", &self.target)
            .finish()
    }
}

