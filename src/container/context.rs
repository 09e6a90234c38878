use arc_swap::{ArcSwap, ArcSwapOption};
use http::StatusCode;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};

use super::{ChildMap, Container, ContainerCore, ContainerKind, Host, Wrapper};
use crate::dispatcher::RequestDispatcher;
use crate::error::{ContainerError, ErrorClass};
use crate::filter::{ApplicationFilterConfig, FilterDef, FilterMap, FilterMaps, FilterRegistry};
use crate::mapper::{normalize, ServletMappings};
use crate::valves::ContextValve;

/// Where an error page applies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorPageKey {
    Status(u16),
    Class(ErrorClass),
    /// Fallback for any error status without a more specific page
    Default,
}

/// Context-relative location rendered when an error matches its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    pub key: ErrorPageKey,
    pub location: String,
}

impl ErrorPage {
    pub fn for_status(status: StatusCode, location: &str) -> Self {
        Self {
            key: ErrorPageKey::Status(status.as_u16()),
            location: location.to_string(),
        }
    }

    pub fn for_class(class: ErrorClass, location: &str) -> Self {
        Self {
            key: ErrorPageKey::Class(class),
            location: location.to_string(),
        }
    }

    pub fn default_page(location: &str) -> Self {
        Self {
            key: ErrorPageKey::Default,
            location: location.to_string(),
        }
    }
}

/// One web application: wrappers, servlet mappings, filters and error pages.
///
/// Mappings and filter maps are read on every request and published copy-on-write;
/// writers serialise on a private lock.
pub struct Context {
    core: ContainerCore,
    path: String,
    parent: RwLock<Weak<Host>>,
    wrappers: ChildMap<Wrapper>,
    mappings: ArcSwap<ServletMappings>,
    filter_defs: RwLock<BTreeMap<String, FilterDef>>,
    filter_maps: ArcSwap<FilterMaps>,
    registry: ArcSwapOption<FilterRegistry>,
    error_pages: RwLock<Vec<ErrorPage>>,
    mutation: Mutex<()>,
    this: Weak<Context>,
}

impl Context {
    /// Context rooted at `path`. `"/"` and `""` both denote the root context.
    pub fn new(path: &str) -> Arc<Context> {
        let path = match path.trim_end_matches('/') {
            "" => String::new(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };
        Arc::new_cyclic(|weak: &Weak<Context>| {
            let this = Weak::clone(weak);
            let container: Weak<dyn Container> = this;
            Context {
                core: ContainerCore::new(&path, ContainerKind::Context, Arc::new(ContextValve), container),
                path: path.clone(),
                parent: RwLock::new(Weak::new()),
                wrappers: ChildMap::default(),
                mappings: ArcSwap::from_pointee(ServletMappings::new()),
                filter_defs: RwLock::new(BTreeMap::new()),
                filter_maps: ArcSwap::from_pointee(FilterMaps::new()),
                registry: ArcSwapOption::empty(),
                error_pages: RwLock::new(Vec::new()),
                mutation: Mutex::new(()),
                this: Weak::clone(weak),
            }
        })
    }

    /// Context path: empty for the root context, else `/name`
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn host(&self) -> Option<Arc<Host>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn attach(&self, parent: &Arc<Host>) -> Result<(), ContainerError> {
        let mut slot = self.parent.write();
        if slot.upgrade().is_some() {
            return Err(ContainerError::AlreadyAttached {
                child: self.name().to_string(),
            });
        }
        *slot = Arc::downgrade(parent);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        *self.parent.write() = Weak::new();
    }

    /// `true` while the context accepts requests
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    // --------------------------------------------------------------- wrappers

    pub fn add_wrapper(&self, wrapper: Arc<Wrapper>) -> Result<(), ContainerError> {
        let Some(this) = self.this.upgrade() else {
            return Err(ContainerError::lifecycle(self.name(), "context is being dropped"));
        };
        self.wrappers.add(self, wrapper, |w| w.attach(&this))
    }

    /// Remove a wrapper together with every servlet mapping pointing at it.
    pub fn remove_wrapper(&self, name: &str) -> Option<Arc<Wrapper>> {
        {
            let _guard = self.mutation.lock();
            let mut next = self.mappings.load().as_ref().clone();
            next.remove_wrapper(name);
            self.mappings.store(Arc::new(next));
        }
        self.wrappers.remove(self, name, Wrapper::detach)
    }

    #[must_use]
    pub fn find_wrapper(&self, name: &str) -> Option<Arc<Wrapper>> {
        self.wrappers.get(name)
    }

    #[must_use]
    pub fn wrappers(&self) -> Vec<Arc<Wrapper>> {
        self.wrappers.list()
    }

    // -------------------------------------------------------- servlet mapping

    /// Map `pattern` to the wrapper called `wrapper`, which must already be a child.
    pub fn add_servlet_mapping(&self, pattern: &str, wrapper: &str) -> Result<(), ContainerError> {
        if self.wrappers.get(wrapper).is_none() {
            return Err(ContainerError::InvalidServletMapping {
                pattern: pattern.to_string(),
                reason: format!("no wrapper named '{wrapper}'"),
            });
        }
        let _guard = self.mutation.lock();
        let mut next = self.mappings.load().as_ref().clone();
        next.add(pattern, wrapper)?;
        self.mappings.store(Arc::new(next));
        debug!(context = %self.name(), pattern = %pattern, wrapper = %wrapper, "servlet mapping added");
        Ok(())
    }

    pub fn remove_servlet_mapping(&self, pattern: &str) -> Option<String> {
        let _guard = self.mutation.lock();
        let mut next = self.mappings.load().as_ref().clone();
        let removed = next.remove(pattern);
        if removed.is_some() {
            self.mappings.store(Arc::new(next));
        }
        removed
    }

    /// Current mapping snapshot
    #[must_use]
    pub fn servlet_mappings(&self) -> Arc<ServletMappings> {
        self.mappings.load_full()
    }

    // ---------------------------------------------------------------- filters

    /// Declare a filter. Takes effect for requests after the next start.
    pub fn add_filter_def(&self, def: FilterDef) {
        debug!(context = %self.name(), filter = %def.name(), "filter defined");
        self.filter_defs.write().insert(def.name().to_string(), def);
    }

    #[must_use]
    pub fn find_filter_def(&self, name: &str) -> Option<FilterDef> {
        self.filter_defs.read().get(name).cloned()
    }

    fn validated(&self, map: &FilterMap) -> Result<(), ContainerError> {
        let defs = self.filter_defs.read();
        map.validate(|name| defs.contains_key(name))
    }

    /// Append a mapping after every mapping added with [`add`](FilterMaps::add)
    pub fn add_filter_map(&self, map: FilterMap) -> Result<(), ContainerError> {
        self.validated(&map)?;
        let _guard = self.mutation.lock();
        let mut next = self.filter_maps.load().as_ref().clone();
        next.add(map);
        self.filter_maps.store(Arc::new(next));
        Ok(())
    }

    /// Insert a mapping ahead of the appended ones, after earlier "before" mappings
    pub fn add_filter_map_before(&self, map: FilterMap) -> Result<(), ContainerError> {
        self.validated(&map)?;
        let _guard = self.mutation.lock();
        let mut next = self.filter_maps.load().as_ref().clone();
        next.add_before(map);
        self.filter_maps.store(Arc::new(next));
        Ok(())
    }

    pub fn remove_filter_map(&self, map: &FilterMap) -> bool {
        let _guard = self.mutation.lock();
        let mut next = self.filter_maps.load().as_ref().clone();
        let removed = next.remove(map);
        if removed {
            self.filter_maps.store(Arc::new(next));
        }
        removed
    }

    #[must_use]
    pub fn filter_maps(&self) -> Arc<FilterMaps> {
        self.filter_maps.load_full()
    }

    /// Started filter configurations, `None` unless the context runs
    #[must_use]
    pub fn filter_registry(&self) -> Option<Arc<FilterRegistry>> {
        self.registry.load_full()
    }

    #[must_use]
    pub fn find_filter_config(&self, name: &str) -> Option<Arc<ApplicationFilterConfig>> {
        let registry = self.registry.load_full()?;
        registry.get(name).map(Arc::clone)
    }

    // ------------------------------------------------------------ error pages

    /// Register an error page, replacing one with the same key.
    pub fn add_error_page(&self, page: ErrorPage) {
        let mut pages = self.error_pages.write();
        pages.retain(|p| p.key != page.key);
        pages.push(page);
    }

    #[must_use]
    pub fn find_error_page_by_status(&self, status: StatusCode) -> Option<ErrorPage> {
        let pages = self.error_pages.read();
        pages
            .iter()
            .find(|p| p.key == ErrorPageKey::Status(status.as_u16()))
            .or_else(|| pages.iter().find(|p| p.key == ErrorPageKey::Default))
            .cloned()
    }

    #[must_use]
    pub fn find_error_page_by_class(&self, class: ErrorClass) -> Option<ErrorPage> {
        self.error_pages
            .read()
            .iter()
            .find(|p| p.key == ErrorPageKey::Class(class))
            .cloned()
    }

    // ------------------------------------------------------------ dispatchers

    /// Dispatcher for a context-relative `path` (which must start with `/` and may
    /// carry a query string). `None` when the path escapes the context or maps to no
    /// wrapper.
    #[must_use]
    pub fn request_dispatcher(self: &Arc<Self>, path: &str) -> Option<RequestDispatcher> {
        if !path.starts_with('/') {
            return None;
        }
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path, None),
        };
        let normalized = normalize(path)?;
        let mapped = self.servlet_mappings().map(&normalized)?;
        let wrapper = self.find_wrapper(&mapped.wrapper)?;
        Some(RequestDispatcher::for_path(
            Arc::clone(self),
            wrapper,
            format!("{}{}", self.path, normalized),
            mapped.servlet_path,
            mapped.path_info,
            query,
        ))
    }

    /// Dispatcher addressing a wrapper by name, bypassing path mapping
    #[must_use]
    pub fn named_dispatcher(self: &Arc<Self>, name: &str) -> Option<RequestDispatcher> {
        let wrapper = self.find_wrapper(name)?;
        Some(RequestDispatcher::named(Arc::clone(self), wrapper))
    }

    fn load_on_startup(&self) {
        let mut startup: Vec<(i32, Arc<Wrapper>)> = self
            .wrappers
            .list()
            .into_iter()
            .filter(|w| w.load_on_startup() >= 0)
            .map(|w| (w.load_on_startup(), w))
            .collect();
        startup.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name().cmp(b.1.name())));
        for (order, wrapper) in startup {
            if let Err(e) = wrapper.load() {
                error!(context = %self.name(), wrapper = %wrapper.name(), order, error = %e, "load-on-startup failed");
            }
        }
    }
}

impl Container for Context {
    fn core(&self) -> &ContainerCore {
        &self.core
    }

    fn parent_container(&self) -> Option<Arc<dyn Container>> {
        self.host().map(|h| h as Arc<dyn Container>)
    }

    fn child_containers(&self) -> Vec<Arc<dyn Container>> {
        self.wrappers.as_dyn()
    }

    fn on_start(&self) -> Result<(), ContainerError> {
        let registry = {
            let defs = self.filter_defs.read();
            FilterRegistry::start(self.name(), defs.values())
                .map_err(|e| ContainerError::lifecycle(self.name(), format!("filter start: {e}")))?
        };
        info!(context = %self.name(), filters = registry.len(), "filters started");
        self.registry.store(Some(Arc::new(registry)));
        self.load_on_startup();
        Ok(())
    }

    fn on_stop(&self) {
        if let Some(registry) = self.registry.swap(None) {
            registry.stop();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("wrappers", &self.wrappers)
            .finish()
    }
}
