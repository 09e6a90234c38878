use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::{ApplicationFilterConfig, FilterChain};
use crate::error::DispatchError;
use crate::instrumentation::{InstanceEventType, InstanceSupport};
use crate::server::{Request, Response};
use crate::servlet::Servlet;

/// Single-pass filter chain for one request.
///
/// Each [`do_filter`](FilterChain::do_filter) call advances a cursor and runs the next
/// matched filter; once the filters are exhausted it runs the servlet. Panics raised
/// by a filter or the servlet are captured as [`DispatchError::Runtime`]. Errors are
/// returned unchanged after the paired "after" instance event fires.
#[derive(Default)]
pub struct ApplicationFilterChain {
    filters: Vec<Arc<ApplicationFilterConfig>>,
    pos: usize,
    servlet: Option<Arc<dyn Servlet>>,
    servlet_name: String,
    support: Option<Arc<InstanceSupport>>,
    servlet_calls: usize,
}

impl ApplicationFilterChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter unless the chain already holds it
    pub(crate) fn add_filter(&mut self, config: Arc<ApplicationFilterConfig>) {
        if self.filters.iter().any(|f| Arc::ptr_eq(f, &config)) {
            return;
        }
        self.filters.push(config);
    }

    pub(crate) fn set_servlet(&mut self, name: &str, servlet: Arc<dyn Servlet>) {
        self.servlet_name.clear();
        self.servlet_name.push_str(name);
        self.servlet = Some(servlet);
    }

    pub(crate) fn set_support(&mut self, support: Option<Arc<InstanceSupport>>) {
        self.support = support;
    }

    /// Matched filter names in execution order
    #[must_use]
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters
            .iter()
            .map(|f| f.filter_name())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Cursor position: the number of filters already entered
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn has_servlet(&self) -> bool {
        self.servlet.is_some()
    }

    #[must_use]
    pub fn servlet_name(&self) -> &str {
        &self.servlet_name
    }

    /// Forget the filters, cursor and servlet. Filter instances are left alone.
    pub fn release(&mut self) {
        self.filters.clear();
        self.pos = 0;
        self.servlet = None;
        self.servlet_name.clear();
        self.support = None;
        self.servlet_calls = 0;
    }

    fn fire(&self, event: InstanceEventType, filter: Option<&str>, result: Option<&Result<(), DispatchError>>) {
        if let Some(support) = &self.support {
            let class = result.and_then(|r| r.as_ref().err()).map(DispatchError::class);
            support.fire(event, filter, class);
        }
    }

    fn run_servlet(&mut self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let Some(servlet) = self.servlet.as_ref().map(Arc::clone) else {
            return Err(DispatchError::illegal_state("filter chain has no servlet"));
        };
        self.servlet_calls += 1;
        if self.servlet_calls > 1 {
            warn!(
                servlet = %self.servlet_name,
                calls = self.servlet_calls,
                request_id = %req.request_id(),
                "filter chain invoked past its end; servlet runs again"
            );
        }
        self.fire(InstanceEventType::BeforeService, None, None);
        let result = catch_unwind(AssertUnwindSafe(|| servlet.service(req, res)))
            .unwrap_or_else(|panic| {
                error!(servlet = %self.servlet_name, request_id = %req.request_id(), "servlet panicked");
                Err(DispatchError::from_panic(panic))
            });
        self.fire(InstanceEventType::AfterService, None, Some(&result));
        result
    }
}

impl FilterChain for ApplicationFilterChain {
    fn do_filter(&mut self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let Some(config) = self.filters.get(self.pos).map(Arc::clone) else {
            return self.run_servlet(req, res);
        };
        self.pos += 1;
        let name = config.filter_name();
        trace!(filter = %name, position = self.pos, request_id = %req.request_id(), "entering filter");
        self.fire(InstanceEventType::BeforeFilter, Some(name), None);
        let filter = Arc::clone(config.filter());
        let result = catch_unwind(AssertUnwindSafe(|| filter.do_filter(req, res, &mut *self)))
            .unwrap_or_else(|panic| {
                error!(filter = %name, request_id = %req.request_id(), "filter panicked");
                Err(DispatchError::from_panic(panic))
            });
        self.fire(InstanceEventType::AfterFilter, Some(name), Some(&result));
        result
    }
}

impl std::fmt::Debug for ApplicationFilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationFilterChain")
            .field("filters", &self.filter_names())
            .field("pos", &self.pos)
            .field("servlet", &self.servlet_name)
            .finish()
    }
}
