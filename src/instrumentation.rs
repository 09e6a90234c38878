//! Instance events fired around filter, servlet and dispatch invocations.
//!
//! Every "before" event is paired with an "after" event, on the error path too. The
//! "after" event carries the [`ErrorClass`] of the failure when there was one; the
//! error itself is always handed back to the caller unchanged.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceEventType {
    BeforeInit,
    AfterInit,
    BeforeService,
    AfterService,
    BeforeFilter,
    AfterFilter,
    BeforeDispatch,
    AfterDispatch,
    BeforeDestroy,
    AfterDestroy,
}

impl InstanceEventType {
    #[must_use]
    pub fn is_before(self) -> bool {
        matches!(
            self,
            InstanceEventType::BeforeInit
                | InstanceEventType::BeforeService
                | InstanceEventType::BeforeFilter
                | InstanceEventType::BeforeDispatch
                | InstanceEventType::BeforeDestroy
        )
    }
}

/// One instance event
#[derive(Debug, Clone, Copy)]
pub struct InstanceEvent<'a> {
    pub event_type: InstanceEventType,
    /// Name of the wrapper firing the event
    pub wrapper: &'a str,
    /// Filter name for filter events
    pub filter: Option<&'a str>,
    /// Failure class for "after" events on the error path
    pub error: Option<ErrorClass>,
}

pub trait InstanceListener: Send + Sync {
    fn instance_event(&self, event: &InstanceEvent<'_>);
}

/// Listener registry owned by one wrapper.
pub struct InstanceSupport {
    wrapper: String,
    listeners: ArcSwap<Vec<Arc<dyn InstanceListener>>>,
    mutation: Mutex<()>,
}

impl InstanceSupport {
    #[must_use]
    pub fn new(wrapper: &str) -> Self {
        Self {
            wrapper: wrapper.to_string(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            mutation: Mutex::new(()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn InstanceListener>) {
        let _guard = self.mutation.lock();
        let mut next = self.listeners.load().as_ref().clone();
        next.push(listener);
        self.listeners.store(Arc::new(next));
    }

    pub fn remove_listener(&self, listener: &Arc<dyn InstanceListener>) {
        let _guard = self.mutation.lock();
        let mut next = self.listeners.load().as_ref().clone();
        next.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        self.listeners.store(Arc::new(next));
    }

    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.load().is_empty()
    }

    pub fn fire(&self, event_type: InstanceEventType, filter: Option<&str>, error: Option<ErrorClass>) {
        let listeners = self.listeners.load();
        if listeners.is_empty() {
            return;
        }
        let event = InstanceEvent {
            event_type,
            wrapper: &self.wrapper,
            filter,
            error,
        };
        for listener in listeners.iter() {
            listener.instance_event(&event);
        }
    }
}

impl std::fmt::Debug for InstanceSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSupport")
            .field("wrapper", &self.wrapper)
            .field("listeners", &self.listeners.load().len())
            .finish()
    }
}
