use once_cell::unsync::OnceCell;
use serde_json::Value;
use std::collections::BTreeMap;

use super::attributes::Marker;
use super::LayerId;
use crate::filter::DispatcherType;

/// Multi-valued request parameters, keyed by name
pub type ParamMap = BTreeMap<String, Vec<String>>;

/// Parse an `application/x-www-form-urlencoded` string into a parameter map.
#[must_use]
pub fn parse_parameters(encoded: &str) -> ParamMap {
    let mut params = ParamMap::new();
    for (name, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
        params
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Merge a dispatch query string over the parameters visible beneath it.
///
/// On a name collision the query-string values come first, followed by the values
/// from below.
#[must_use]
pub fn merge_parameters(query: &str, below: &ParamMap) -> ParamMap {
    let mut merged = parse_parameters(query);
    for (name, values) in below {
        merged
            .entry(name.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
    merged
}

/// A user-supplied request decorator.
///
/// Filters push decorators with [`Request::push_decorator`](crate::server::Request::push_decorator)
/// and remove them by the returned [`LayerId`]. Every method returns `None` when the
/// decorator does not override the value, in which case lookup continues inwards.
pub trait RequestDecorator: Send {
    fn attribute(&self, _name: &str) -> Option<&Value> {
        None
    }

    /// Names of the attributes this decorator contributes
    fn attribute_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn header(&self, _name: &str) -> Option<&str> {
        None
    }

    fn parameter_values(&self, _name: &str) -> Option<&[String]> {
        None
    }
}

/// Shadowing state installed by a request dispatcher for one forward or include.
///
/// The layer copies the path decomposition of the request view it wraps, so it
/// answers every path query on its own; the dispatcher then overwrites the values
/// that change for the target.
#[derive(Debug)]
pub struct DispatchedRequest {
    pub(crate) context_path: String,
    pub(crate) request_uri: String,
    pub(crate) servlet_path: String,
    pub(crate) path_info: Option<String>,
    pub(crate) query_string: Option<String>,
    pub(crate) dispatcher_type: DispatcherType,
    pub(crate) dispatch_path: Option<String>,
    specials: [Option<Value>; 10],
    query_params: Option<String>,
    merged: OnceCell<ParamMap>,
}

impl DispatchedRequest {
    pub(crate) fn new(
        context_path: String,
        request_uri: String,
        servlet_path: String,
        path_info: Option<String>,
        query_string: Option<String>,
        dispatcher_type: DispatcherType,
    ) -> Self {
        Self {
            context_path,
            request_uri,
            servlet_path,
            path_info,
            query_string,
            dispatcher_type,
            dispatch_path: None,
            specials: Default::default(),
            query_params: None,
            merged: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    #[must_use]
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    #[must_use]
    pub fn servlet_path(&self) -> &str {
        &self.servlet_path
    }

    #[must_use]
    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    #[must_use]
    pub fn dispatcher_type(&self) -> DispatcherType {
        self.dispatcher_type
    }

    /// Value held in a marker slot
    #[must_use]
    pub fn special(&self, marker: Marker) -> Option<&Value> {
        self.specials[marker.index()].as_ref()
    }

    pub(crate) fn set_special(&mut self, marker: Marker, value: Option<Value>) {
        self.specials[marker.index()] = value;
    }

    /// Store a string marker, leaving the slot empty for `None`
    pub(crate) fn set_special_str(&mut self, marker: Marker, value: Option<&str>) {
        self.set_special(marker, value.map(|v| Value::String(v.to_string())));
    }

    /// Query string whose parameters are merged over the wrapped parameters
    pub(crate) fn set_query_params(&mut self, query: &str) {
        self.query_params = Some(query.to_string());
        self.merged = OnceCell::new();
    }

    pub(crate) fn query_params(&self) -> Option<&str> {
        self.query_params.as_deref()
    }

    /// Merged parameter map, computed on first access from the parameters below.
    pub(crate) fn merged_parameters<'a>(
        &'a self,
        below: impl FnOnce() -> &'a ParamMap,
    ) -> Option<&'a ParamMap> {
        let query = self.query_params.as_deref()?;
        Some(self.merged.get_or_init(|| merge_parameters(query, below())))
    }
}

pub(crate) enum RequestLayerKind {
    Dispatch(DispatchedRequest),
    Custom(Box<dyn RequestDecorator>),
}

/// One layer in the request decorator stack.
pub struct RequestLayer {
    id: LayerId,
    pub(crate) kind: RequestLayerKind,
}

impl RequestLayer {
    pub(crate) fn dispatch(layer: DispatchedRequest) -> Self {
        Self {
            id: LayerId::next(),
            kind: RequestLayerKind::Dispatch(layer),
        }
    }

    pub(crate) fn custom(decorator: Box<dyn RequestDecorator>) -> Self {
        Self {
            id: LayerId::next(),
            kind: RequestLayerKind::Custom(decorator),
        }
    }

    #[must_use]
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// `true` when the layer was installed by a request dispatcher
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        matches!(self.kind, RequestLayerKind::Dispatch(_))
    }

    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchedRequest> {
        match &self.kind {
            RequestLayerKind::Dispatch(d) => Some(d),
            RequestLayerKind::Custom(_) => None,
        }
    }

    pub(crate) fn as_dispatch_mut(&mut self) -> Option<&mut DispatchedRequest> {
        match &mut self.kind {
            RequestLayerKind::Dispatch(d) => Some(d),
            RequestLayerKind::Custom(_) => None,
        }
    }
}

impl std::fmt::Debug for RequestLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_dispatch() { "dispatch" } else { "custom" };
        f.debug_struct("RequestLayer")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_puts_query_values_first() {
        let below = parse_parameters("a=body&b=2");
        let merged = merge_parameters("a=query&c=3", &below);
        assert_eq!(merged["a"], vec!["query".to_string(), "body".to_string()]);
        assert_eq!(merged["b"], vec!["2".to_string()]);
        assert_eq!(merged["c"], vec!["3".to_string()]);
    }

    #[test]
    fn test_parse_decodes() {
        let params = parse_parameters("name=J%C3%B6rg&x=a+b&x=c");
        assert_eq!(params["name"], vec!["Jörg".to_string()]);
        assert_eq!(params["x"], vec!["a b".to_string(), "c".to_string()]);
    }
}
