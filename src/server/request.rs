use http::Method;
use once_cell::unsync::OnceCell;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{HeaderVec, MappingData};
use crate::container::{Context, Host, Wrapper};
use crate::decorator::attributes::{Marker, INCLUDE_PATH_INFO, INCLUDE_SERVLET_PATH};
use crate::decorator::{
    dispatch_insertion_index, parse_parameters, remove_by_id, DispatchedRequest, LayerId,
    ParamMap, RequestDecorator, RequestLayer, RequestLayerKind,
};
use crate::dispatcher::RequestDispatcher;
use crate::error::ErrorClass;
use crate::filter::{ApplicationFilterChain, DispatcherType};
use crate::ids::RequestId;

/// Summary of a failure recorded on a request by the wrapper valve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub class: ErrorClass,
    pub message: String,
    pub servlet_name: Option<String>,
}

/// Container-level request.
///
/// Holds the base state produced by the connector and the mapper plus the stack of
/// decorator layers installed by dispatchers and filters. Every accessor answers
/// through the layers, outermost first; see [`crate::decorator`].
///
/// The request also carries the pooled filter chain between uses and the dispatch
/// type / dispatch path consumed by the filter-chain factory.
pub struct Request {
    request_id: RequestId,
    method: Method,
    server_name: String,
    request_uri: String,
    context_path: String,
    servlet_path: String,
    path_info: Option<String>,
    query_string: Option<String>,
    headers: HeaderVec,
    attributes: HashMap<String, Value>,
    body: Option<String>,
    params: OnceCell<ParamMap>,
    dispatcher_type: DispatcherType,
    dispatch_path: Option<String>,
    mapping: MappingData,
    layers: Vec<RequestLayer>,
    filter_chain: Option<ApplicationFilterChain>,
    error: Option<ErrorInfo>,
}

impl Request {
    /// Build a request for `uri`, which may carry a query string after `?`.
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (uri, None),
        };
        Self {
            request_id: RequestId::new(),
            method,
            server_name: "localhost".to_string(),
            request_uri: path.to_string(),
            context_path: String::new(),
            servlet_path: String::new(),
            path_info: None,
            query_string: query,
            headers: HeaderVec::new(),
            attributes: HashMap::new(),
            body: None,
            params: OnceCell::new(),
            dispatcher_type: DispatcherType::Request,
            dispatch_path: None,
            mapping: MappingData::default(),
            layers: Vec::new(),
            filter_chain: None,
            error: None,
        }
    }

    /// `GET` request for `uri`
    #[must_use]
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    #[must_use]
    pub fn with_server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_string();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((Arc::from(name), value.to_string()));
        if name.eq_ignore_ascii_case("x-request-id") {
            self.request_id = RequestId::from_header_or_new(Some(value));
        }
        self
    }

    /// Attach an `application/x-www-form-urlencoded` body
    #[must_use]
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self.params = OnceCell::new();
        self
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn outer_dispatch(&self) -> Option<&DispatchedRequest> {
        self.layers.iter().rev().find_map(RequestLayer::as_dispatch)
    }

    fn outer_dispatch_mut(&mut self) -> Option<&mut DispatchedRequest> {
        self.layers
            .iter_mut()
            .rev()
            .find_map(RequestLayer::as_dispatch_mut)
    }

    #[must_use]
    pub fn request_uri(&self) -> &str {
        self.outer_dispatch()
            .map_or(self.request_uri.as_str(), DispatchedRequest::request_uri)
    }

    #[must_use]
    pub fn context_path(&self) -> &str {
        self.outer_dispatch()
            .map_or(self.context_path.as_str(), DispatchedRequest::context_path)
    }

    #[must_use]
    pub fn servlet_path(&self) -> &str {
        self.outer_dispatch()
            .map_or(self.servlet_path.as_str(), DispatchedRequest::servlet_path)
    }

    #[must_use]
    pub fn path_info(&self) -> Option<&str> {
        match self.outer_dispatch() {
            Some(d) => d.path_info(),
            None => self.path_info.as_deref(),
        }
    }

    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        match self.outer_dispatch() {
            Some(d) => d.query_string(),
            None => self.query_string.as_deref(),
        }
    }

    /// Path within the context: servlet path followed by path info
    #[must_use]
    pub fn request_path(&self) -> String {
        let mut path = self.servlet_path().to_string();
        if let Some(info) = self.path_info() {
            path.push_str(info);
        }
        path
    }

    /// Path decomposition produced by the mapper for the base request
    pub(crate) fn set_path_decomposition(
        &mut self,
        context_path: &str,
        servlet_path: &str,
        path_info: Option<&str>,
    ) {
        self.context_path = context_path.to_string();
        self.servlet_path = servlet_path.to_string();
        self.path_info = path_info.map(str::to_string);
    }

    /// Base request URI, ignoring layers (what the mapper sees)
    pub(crate) fn base_request_uri(&self) -> &str {
        &self.request_uri
    }

    // ----------------------------------------------------------------- headers

    /// Header value, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        for layer in self.layers.iter().rev() {
            if let RequestLayerKind::Custom(d) = &layer.kind {
                if let Some(v) = d.header(name) {
                    return Some(v);
                }
            }
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    // -------------------------------------------------------------- attributes

    /// Attribute lookup through the layers.
    ///
    /// Marker attributes are answered from the dispatch layer slots. A forward marker
    /// that is absent on an include layer falls through to the wrapped view, so an
    /// include nested in a forward still sees the forward markers; an absent include
    /// marker hides any outer include's value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        let marker = Marker::from_name(name);
        for layer in self.layers.iter().rev() {
            match &layer.kind {
                RequestLayerKind::Custom(d) => {
                    if let Some(v) = d.attribute(name) {
                        return Some(v);
                    }
                }
                RequestLayerKind::Dispatch(d) => {
                    let Some(marker) = marker else { continue };
                    match d.special(marker) {
                        Some(v) => return Some(v),
                        None if marker.is_forward()
                            && d.special(Marker::ForwardRequestUri).is_none() =>
                        {
                            continue
                        }
                        None => return None,
                    }
                }
            }
        }
        self.attributes.get(name)
    }

    /// String attribute convenience
    #[must_use]
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Set an attribute. Markers land in the outermost dispatch layer when there is one.
    pub fn set_attribute(&mut self, name: &str, value: Value) {
        if let Some(marker) = Marker::from_name(name) {
            if let Some(d) = self.outer_dispatch_mut() {
                d.set_special(marker, Some(value));
                return;
            }
        }
        self.attributes.insert(name.to_string(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        if let Some(marker) = Marker::from_name(name) {
            if let Some(d) = self.outer_dispatch_mut() {
                let previous = d.special(marker).cloned();
                d.set_special(marker, None);
                return previous;
            }
        }
        self.attributes.remove(name)
    }

    /// Names of all visible attributes, sorted.
    ///
    /// Marker names are listed only when they resolve to a value through the layers.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .attributes
            .keys()
            .filter(|k| Marker::from_name(k).is_none())
            .cloned()
            .collect();
        for layer in &self.layers {
            if let RequestLayerKind::Custom(d) = &layer.kind {
                names.extend(d.attribute_names());
            }
        }
        for marker in Marker::ALL {
            if self.attribute(marker.name()).is_some() {
                names.insert(marker.name().to_string());
            }
        }
        names.into_iter().collect()
    }

    // -------------------------------------------------------------- parameters

    fn base_parameters(&self) -> &ParamMap {
        self.params.get_or_init(|| {
            let mut params = self
                .query_string
                .as_deref()
                .map(parse_parameters)
                .unwrap_or_default();
            if let Some(body) = self.body.as_deref() {
                for (name, values) in parse_parameters(body) {
                    params.entry(name).or_default().extend(values);
                }
            }
            params
        })
    }

    /// Parameters visible beneath layer index `depth` (exclusive)
    fn parameters_below(&self, depth: usize) -> &ParamMap {
        for i in (0..depth).rev() {
            if let Some(d) = self.layers[i].as_dispatch() {
                if let Some(merged) = d.merged_parameters(|| self.parameters_below(i)) {
                    return merged;
                }
            }
        }
        self.base_parameters()
    }

    /// All values of a parameter; query-string values precede body values.
    #[must_use]
    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        for (i, layer) in self.layers.iter().enumerate().rev() {
            match &layer.kind {
                RequestLayerKind::Custom(d) => {
                    if let Some(v) = d.parameter_values(name) {
                        return Some(v);
                    }
                }
                RequestLayerKind::Dispatch(d) if d.query_params().is_some() => {
                    return self
                        .parameters_below(i + 1)
                        .get(name)
                        .map(Vec::as_slice);
                }
                RequestLayerKind::Dispatch(_) => {}
            }
        }
        self.base_parameters().get(name).map(Vec::as_slice)
    }

    /// First value of a parameter
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameter_values(name)
            .and_then(<[String]>::first)
            .map(String::as_str)
    }

    /// Snapshot of every visible parameter
    #[must_use]
    pub fn parameter_map(&self) -> ParamMap {
        self.parameters_below(self.layers.len()).clone()
    }

    // ---------------------------------------------------------- dispatch state

    /// Current dispatch type: the outermost dispatch layer's, else the base value
    #[must_use]
    pub fn dispatcher_type(&self) -> DispatcherType {
        self.outer_dispatch()
            .map_or(self.dispatcher_type, DispatchedRequest::dispatcher_type)
    }

    /// Path used for URL-pattern filter matching
    #[must_use]
    pub fn dispatch_path(&self) -> Option<&str> {
        match self.outer_dispatch() {
            Some(d) => d.dispatch_path.as_deref(),
            None => self.dispatch_path.as_deref(),
        }
    }

    /// Set the dispatch type on the outermost dispatch layer, or the base request
    pub fn set_dispatcher_type(&mut self, dispatcher_type: DispatcherType) {
        match self.outer_dispatch_mut() {
            Some(d) => d.dispatcher_type = dispatcher_type,
            None => self.dispatcher_type = dispatcher_type,
        }
    }

    pub fn set_dispatch_path(&mut self, path: Option<String>) {
        match self.outer_dispatch_mut() {
            Some(d) => d.dispatch_path = path,
            None => self.dispatch_path = path,
        }
    }

    // ----------------------------------------------------------------- mapping

    #[must_use]
    pub fn mapping(&self) -> &MappingData {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut MappingData {
        &mut self.mapping
    }

    #[must_use]
    pub fn host(&self) -> Option<Arc<Host>> {
        self.mapping.host.clone()
    }

    #[must_use]
    pub fn context(&self) -> Option<Arc<Context>> {
        self.mapping.context.clone()
    }

    #[must_use]
    pub fn wrapper(&self) -> Option<Arc<Wrapper>> {
        self.mapping.wrapper.clone()
    }

    /// Dispatcher for `path`, resolving relative paths against the current request path.
    #[must_use]
    pub fn request_dispatcher(&self, path: &str) -> Option<RequestDispatcher> {
        let context = self.mapping.context.as_ref()?;
        if path.starts_with('/') {
            return context.request_dispatcher(path);
        }
        let mut current = match self.attribute_str(INCLUDE_SERVLET_PATH) {
            Some(servlet_path) => {
                let mut p = servlet_path.to_string();
                if let Some(info) = self.attribute_str(INCLUDE_PATH_INFO) {
                    p.push_str(info);
                }
                p
            }
            None => self.request_path(),
        };
        match current.rfind('/') {
            Some(slash) => current.truncate(slash + 1),
            None => current = "/".to_string(),
        }
        current.push_str(path);
        context.request_dispatcher(&current)
    }

    // ------------------------------------------------------------------ layers

    /// Push a decorator as the new outermost layer
    pub fn push_decorator(&mut self, decorator: Box<dyn RequestDecorator>) -> LayerId {
        let layer = RequestLayer::custom(decorator);
        let id = layer.id();
        self.layers.push(layer);
        id
    }

    /// Remove a layer by identity; other layers keep their order.
    pub fn remove_layer(&mut self, id: LayerId) -> Option<RequestLayer> {
        remove_by_id(&mut self.layers, id, RequestLayer::id)
    }

    /// Layer identities, innermost first
    #[must_use]
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(RequestLayer::id).collect()
    }

    #[must_use]
    pub fn layers(&self) -> &[RequestLayer] {
        &self.layers
    }

    /// Insert a dispatch layer at the dispatcher insertion point
    pub(crate) fn insert_dispatch_layer(&mut self, layer: DispatchedRequest) -> LayerId {
        let layer = RequestLayer::dispatch(layer);
        let id = layer.id();
        let index = dispatch_insertion_index(&self.layers, RequestLayer::is_dispatch);
        self.layers.insert(index, layer);
        id
    }

    /// A fresh dispatch layer copying the current path view
    pub(crate) fn snapshot_view(&self, dispatcher_type: DispatcherType) -> DispatchedRequest {
        DispatchedRequest::new(
            self.context_path().to_string(),
            self.request_uri().to_string(),
            self.servlet_path().to_string(),
            self.path_info().map(str::to_string),
            self.query_string().map(str::to_string),
            dispatcher_type,
        )
    }

    // ------------------------------------------------------------ filter chain

    pub(crate) fn take_filter_chain(&mut self) -> Option<ApplicationFilterChain> {
        self.filter_chain.take()
    }

    pub(crate) fn set_filter_chain(&mut self, chain: ApplicationFilterChain) {
        self.filter_chain = Some(chain);
    }

    /// `true` when a released chain is parked on this request for reuse
    #[must_use]
    pub fn has_pooled_filter_chain(&self) -> bool {
        self.filter_chain.is_some()
    }

    // ------------------------------------------------------------------ errors

    #[must_use]
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn set_error_info(&mut self, info: ErrorInfo) {
        self.error = Some(info);
    }

    /// Reset all per-request state for reuse with a new URI.
    ///
    /// A pooled filter chain survives, already released.
    pub fn recycle(&mut self, method: Method, uri: &str) {
        let chain = self.filter_chain.take();
        *self = Request::new(method, uri);
        if let Some(mut chain) = chain {
            chain.release();
            self.filter_chain = Some(chain);
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("request_uri", &self.request_uri())
            .field("servlet_path", &self.servlet_path())
            .field("path_info", &self.path_info())
            .field("dispatcher_type", &self.dispatcher_type())
            .field("layers", &self.layers)
            .finish()
    }
}
