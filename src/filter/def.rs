use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{ApplicationFilterConfig, DispatchMask};
use crate::error::{ContainerError, DispatchError};
use crate::server::{Request, Response};

/// Middleware matched per request by URL pattern or servlet name plus dispatch type.
///
/// One instance serves every matching request concurrently.
pub trait Filter: Send + Sync {
    fn init(&self, _config: &ApplicationFilterConfig) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Process the request. Call `chain.do_filter(..)` to continue; returning without
    /// doing so ends the chain here.
    fn do_filter(
        &self,
        req: &mut Request,
        res: &mut Response,
        chain: &mut dyn FilterChain,
    ) -> Result<(), DispatchError>;

    fn destroy(&self) {}
}

/// The remainder of a filter chain, as seen by a [`Filter`].
pub trait FilterChain {
    fn do_filter(&mut self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError>;
}

/// Creates filter instances
pub type FilterFactory = Arc<dyn Fn() -> Result<Arc<dyn Filter>, DispatchError> + Send + Sync>;

#[derive(Clone)]
enum FilterSource {
    Instance(Arc<dyn Filter>),
    Factory(FilterFactory),
}

/// Declared filter: name, implementation and init parameters.
#[derive(Clone)]
pub struct FilterDef {
    name: String,
    source: FilterSource,
    init_params: BTreeMap<String, String>,
    description: Option<String>,
}

impl FilterDef {
    /// Declare a filter backed by an existing instance
    pub fn new(name: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        Self {
            name: name.into(),
            source: FilterSource::Instance(filter),
            init_params: BTreeMap::new(),
            description: None,
        }
    }

    /// Declare a filter instantiated from `factory` each time the context starts
    pub fn with_factory(name: impl Into<String>, factory: FilterFactory) -> Self {
        Self {
            name: name.into(),
            source: FilterSource::Factory(factory),
            init_params: BTreeMap::new(),
            description: None,
        }
    }

    #[must_use]
    pub fn init_param(mut self, name: &str, value: &str) -> Self {
        self.init_params.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn init_params(&self) -> &BTreeMap<String, String> {
        &self.init_params
    }

    pub(crate) fn instantiate(&self) -> Result<Arc<dyn Filter>, DispatchError> {
        match &self.source {
            FilterSource::Instance(filter) => Ok(Arc::clone(filter)),
            FilterSource::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for FilterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDef")
            .field("name", &self.name)
            .field("init_params", &self.init_params)
            .field("description", &self.description)
            .finish()
    }
}

/// What a filter mapping is matched against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterTarget {
    UrlPattern(String),
    /// `*` matches every servlet
    ServletName(String),
}

/// One filter-applicability rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterMap {
    filter_name: String,
    target: FilterTarget,
    dispatch: DispatchMask,
}

impl FilterMap {
    /// Map `filter_name` to a URL pattern for plain requests
    pub fn url(filter_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            filter_name: filter_name.into(),
            target: FilterTarget::UrlPattern(pattern.into()),
            dispatch: DispatchMask::default(),
        }
    }

    /// Map `filter_name` to a servlet name for plain requests
    pub fn servlet(filter_name: impl Into<String>, servlet_name: impl Into<String>) -> Self {
        Self {
            filter_name: filter_name.into(),
            target: FilterTarget::ServletName(servlet_name.into()),
            dispatch: DispatchMask::default(),
        }
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchMask) -> Self {
        self.dispatch = dispatch;
        self
    }

    #[must_use]
    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    #[must_use]
    pub fn target(&self) -> &FilterTarget {
        &self.target
    }

    #[must_use]
    pub fn dispatch(&self) -> DispatchMask {
        self.dispatch
    }

    #[must_use]
    pub fn url_pattern(&self) -> Option<&str> {
        match &self.target {
            FilterTarget::UrlPattern(p) => Some(p),
            FilterTarget::ServletName(_) => None,
        }
    }

    #[must_use]
    pub fn servlet_name(&self) -> Option<&str> {
        match &self.target {
            FilterTarget::ServletName(n) => Some(n),
            FilterTarget::UrlPattern(_) => None,
        }
    }

    /// Check the mapping against the declared filters.
    pub fn validate(&self, is_defined: impl Fn(&str) -> bool) -> Result<(), ContainerError> {
        if !is_defined(&self.filter_name) {
            return Err(ContainerError::UnknownFilter {
                filter: self.filter_name.clone(),
            });
        }
        let invalid = |reason: &str| ContainerError::InvalidFilterMap {
            filter: self.filter_name.clone(),
            reason: reason.to_string(),
        };
        if self.dispatch.is_empty() {
            return Err(invalid("empty dispatch type set"));
        }
        match &self.target {
            FilterTarget::UrlPattern(p) if !valid_url_pattern(p) => {
                Err(invalid(&format!("invalid url pattern '{p}'")))
            }
            FilterTarget::ServletName(n) if n.is_empty() => Err(invalid("empty servlet name")),
            _ => Ok(()),
        }
    }
}

/// `""`, `/...` or `*.ext` (without a `/` in the extension)
pub(crate) fn valid_url_pattern(pattern: &str) -> bool {
    if pattern.contains(['\r', '\n']) {
        return false;
    }
    if pattern.is_empty() || pattern.starts_with('/') {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(ext) => !ext.contains('/'),
        None => false,
    }
}

/// Filter mappings of one context, in match order.
///
/// [`add_before`](FilterMaps::add_before) mappings come first, in insertion order,
/// followed by every [`add`](FilterMaps::add) mapping.
#[derive(Debug, Clone, Default)]
pub struct FilterMaps {
    maps: Vec<FilterMap>,
    insert_point: usize,
}

impl FilterMaps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping after every existing mapping
    pub fn add(&mut self, map: FilterMap) {
        self.maps.push(map);
    }

    /// Insert a mapping ahead of the declared mappings, after earlier `add_before` calls
    pub fn add_before(&mut self, map: FilterMap) {
        self.maps.insert(self.insert_point, map);
        self.insert_point += 1;
    }

    /// Remove the first mapping equal to `map`
    pub fn remove(&mut self, map: &FilterMap) -> bool {
        let Some(pos) = self.maps.iter().position(|m| m == map) else {
            return false;
        };
        self.maps.remove(pos);
        if pos < self.insert_point {
            self.insert_point -= 1;
        }
        true
    }

    #[must_use]
    pub fn as_slice(&self) -> &[FilterMap] {
        &self.maps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterMap> {
        self.maps.iter()
    }
}

impl<'a> IntoIterator for &'a FilterMaps {
    type Item = &'a FilterMap;
    type IntoIter = std::slice::Iter<'a, FilterMap>;

    fn into_iter(self) -> Self::IntoIter {
        self.maps.iter()
    }
}
