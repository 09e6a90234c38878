use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

use super::background::BackgroundProcessor;
use super::collaborators::{Collaborators, Loader, Manager, Realm, Resources};
use crate::error::ContainerError;
use crate::pipeline::{Pipeline, Valve};
use crate::runtime_config::RuntimeConfig;

/// The four container levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Engine,
    Host,
    Context,
    Wrapper,
}

impl ContainerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::Engine => "engine",
            ContainerKind::Host => "host",
            ContainerKind::Context => "context",
            ContainerKind::Wrapper => "wrapper",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    New = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LifecycleState::Starting,
            2 => LifecycleState::Started,
            3 => LifecycleState::Stopping,
            4 => LifecycleState::Stopped,
            5 => LifecycleState::Failed,
            _ => LifecycleState::New,
        }
    }

    /// `true` while requests may be processed
    #[must_use]
    pub fn is_available(self) -> bool {
        self == LifecycleState::Started
    }
}

/// Structural and periodic events emitted by a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    AddChild(String),
    RemoveChild(String),
    AddValve(String),
    RemoveValve(String),
    Periodic,
    Lifecycle(LifecycleState),
}

pub trait ContainerListener: Send + Sync {
    fn container_event(&self, container: &str, event: &ContainerEvent);
}

/// State shared by every container kind.
pub struct ContainerCore {
    name: String,
    kind: ContainerKind,
    pipeline: Pipeline,
    state: AtomicU8,
    collaborators: Collaborators,
    listeners: ArcSwap<Vec<Arc<dyn ContainerListener>>>,
    listener_lock: Mutex<()>,
    background_delay: AtomicI64,
    background: BackgroundProcessor,
    this: Weak<dyn Container>,
}

impl ContainerCore {
    /// `this` must point at the container embedding this core.
    pub(crate) fn new(name: &str, kind: ContainerKind, basic: Arc<dyn Valve>, this: Weak<dyn Container>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            pipeline: Pipeline::with_basic(name, basic),
            state: AtomicU8::new(LifecycleState::New as u8),
            collaborators: Collaborators::default(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            listener_lock: Mutex::new(()),
            background_delay: AtomicI64::new(-1),
            background: BackgroundProcessor::default(),
            this,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
        self.fire(&ContainerEvent::Lifecycle(state));
    }

    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        let _guard = self.listener_lock.lock();
        let mut next = self.listeners.load().as_ref().clone();
        next.push(listener);
        self.listeners.store(Arc::new(next));
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) {
        let _guard = self.listener_lock.lock();
        let mut next = self.listeners.load().as_ref().clone();
        next.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        self.listeners.store(Arc::new(next));
    }

    pub fn fire(&self, event: &ContainerEvent) {
        for listener in self.listeners.load().iter() {
            listener.container_event(&self.name, event);
        }
    }

    #[must_use]
    pub fn background_delay(&self) -> i64 {
        self.background_delay.load(Ordering::Relaxed)
    }

    pub fn set_background_delay(&self, secs: i64) {
        self.background_delay.store(secs, Ordering::Relaxed);
    }

    pub(crate) fn start_background(&self) -> Result<(), ContainerError> {
        let delay = self.background_delay();
        if delay <= 0 {
            return Ok(());
        }
        self.background.start(
            Weak::clone(&self.this),
            &self.name,
            Duration::from_secs(delay.unsigned_abs()),
        )
    }

    pub(crate) fn stop_background(&self) {
        self.background.stop();
    }

    #[must_use]
    pub fn has_background_thread(&self) -> bool {
        self.background.is_running()
    }
}

impl fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerCore")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// One node of the container tree.
///
/// Implementors supply [`core`](Container::core) and the two tree links; the rest of
/// the behavior is shared. Collaborator getters follow the override-or-inherit rule:
/// the local value when set, else the parent's answer, else `None`.
pub trait Container: Send + Sync + 'static {
    fn core(&self) -> &ContainerCore;

    fn parent_container(&self) -> Option<Arc<dyn Container>>;

    fn child_containers(&self) -> Vec<Arc<dyn Container>>;

    /// Called during start, after the children and the pipeline started
    fn on_start(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    /// Called during stop, after the children and the pipeline stopped
    fn on_stop(&self) {}

    fn name(&self) -> &str {
        self.core().name()
    }

    fn kind(&self) -> ContainerKind {
        self.core().kind()
    }

    fn pipeline(&self) -> &Pipeline {
        self.core().pipeline()
    }

    fn state(&self) -> LifecycleState {
        self.core().state()
    }

    fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.core()
            .collaborators()
            .loader()
            .or_else(|| self.parent_container().and_then(|p| p.loader()))
    }

    fn manager(&self) -> Option<Arc<dyn Manager>> {
        self.core()
            .collaborators()
            .manager()
            .or_else(|| self.parent_container().and_then(|p| p.manager()))
    }

    fn realm(&self) -> Option<Arc<dyn Realm>> {
        self.core()
            .collaborators()
            .realm()
            .or_else(|| self.parent_container().and_then(|p| p.realm()))
    }

    fn resources(&self) -> Option<Arc<dyn Resources>> {
        self.core()
            .collaborators()
            .resources()
            .or_else(|| self.parent_container().and_then(|p| p.resources()))
    }

    fn runtime_config(&self) -> Option<Arc<RuntimeConfig>> {
        self.core()
            .collaborators()
            .runtime_config()
            .or_else(|| self.parent_container().and_then(|p| p.runtime_config()))
    }

    /// Insert `valve` ahead of the basic valve and emit [`ContainerEvent::AddValve`]
    fn add_valve(&self, valve: Arc<dyn Valve>) {
        let name = valve.name().to_string();
        self.pipeline().add_valve(valve);
        self.core().fire(&ContainerEvent::AddValve(name));
    }

    /// Remove `valve` and emit [`ContainerEvent::RemoveValve`] when it was present
    fn remove_valve(&self, valve: &Arc<dyn Valve>) -> Result<bool, ContainerError> {
        let removed = self.pipeline().remove_valve(valve)?;
        if removed {
            self.core()
                .fire(&ContainerEvent::RemoveValve(valve.name().to_string()));
        }
        Ok(removed)
    }

    fn add_container_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.core().add_listener(listener);
    }

    fn remove_container_listener(&self, listener: &Arc<dyn ContainerListener>) {
        self.core().remove_listener(listener);
    }

    fn background_processor_delay(&self) -> i64 {
        self.core().background_delay()
    }

    /// Seconds between background runs; `<= 0` leaves maintenance to the parent.
    fn set_background_processor_delay(&self, secs: i64) {
        self.core().set_background_delay(secs);
    }

    /// Periodic maintenance of the local collaborators and valves
    fn background_process(&self) {
        self.core().collaborators().background_process();
        self.pipeline().background_process();
        self.core().fire(&ContainerEvent::Periodic);
    }

    fn start(&self) -> Result<(), ContainerError> {
        start_container(self)
    }

    fn stop(&self) -> Result<(), ContainerError> {
        stop_container(self);
        Ok(())
    }
}

fn start_container<C: Container + ?Sized>(container: &C) -> Result<(), ContainerError> {
    let core = container.core();
    if matches!(core.state(), LifecycleState::Starting | LifecycleState::Started) {
        return Ok(());
    }
    core.set_state(LifecycleState::Starting);

    let mut child_failure = None;
    for child in container.child_containers() {
        if let Err(e) = child.start() {
            error!(container = %core.name(), child = %child.name(), error = %e, "child failed to start");
            child_failure.get_or_insert(e);
        }
    }
    if let Some(e) = child_failure {
        core.set_state(LifecycleState::Failed);
        return Err(ContainerError::lifecycle(
            core.name(),
            format!("a child failed to start: {e}"),
        ));
    }

    if let Err(e) = core.pipeline().start().and_then(|()| container.on_start()) {
        error!(container = %core.name(), error = %e, "container failed to start");
        core.set_state(LifecycleState::Failed);
        return Err(e);
    }
    core.set_state(LifecycleState::Started);
    core.start_background()?;
    info!(container = %core.name(), kind = core.kind().as_str(), "container started");
    Ok(())
}

fn stop_container<C: Container + ?Sized>(container: &C) {
    let core = container.core();
    if matches!(
        core.state(),
        LifecycleState::New | LifecycleState::Stopping | LifecycleState::Stopped
    ) {
        return;
    }
    core.set_state(LifecycleState::Stopping);
    core.stop_background();
    for child in container.child_containers() {
        if let Err(e) = child.stop() {
            error!(container = %core.name(), child = %child.name(), error = %e, "child failed to stop");
        }
    }
    core.pipeline().stop();
    container.on_stop();
    core.set_state(LifecycleState::Stopped);
    info!(container = %core.name(), kind = core.kind().as_str(), "container stopped");
}

/// Children of one container keyed by name, with lock-free reads.
pub struct ChildMap<C> {
    children: ArcSwap<BTreeMap<String, Arc<C>>>,
    mutation: Mutex<()>,
}

impl<C> Default for ChildMap<C> {
    fn default() -> Self {
        Self {
            children: ArcSwap::from_pointee(BTreeMap::new()),
            mutation: Mutex::new(()),
        }
    }
}

impl<C: Container> ChildMap<C> {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<C>> {
        self.children.load().get(name).map(Arc::clone)
    }

    /// Children sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<Arc<C>> {
        self.children.load().values().map(Arc::clone).collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.children.load().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.load().is_empty()
    }

    pub(crate) fn as_dyn(&self) -> Vec<Arc<dyn Container>> {
        self.children
            .load()
            .values()
            .map(|c| Arc::clone(c) as Arc<dyn Container>)
            .collect()
    }

    /// Add `child` under `parent`.
    ///
    /// The duplicate check, `attach` and the insertion happen under the writer lock, so
    /// a rejected child leaves both the map and the child untouched. A running parent
    /// starts the child afterwards.
    pub(crate) fn add(
        &self,
        parent: &dyn Container,
        child: Arc<C>,
        attach: impl FnOnce(&C) -> Result<(), ContainerError>,
    ) -> Result<(), ContainerError> {
        {
            let _guard = self.mutation.lock();
            let current = self.children.load_full();
            if current.contains_key(child.name()) {
                return Err(ContainerError::DuplicateChild {
                    parent: parent.name().to_string(),
                    child: child.name().to_string(),
                });
            }
            attach(&child)?;
            let mut next = current.as_ref().clone();
            next.insert(child.name().to_string(), Arc::clone(&child));
            self.children.store(Arc::new(next));
        }
        debug!(parent = %parent.name(), child = %child.name(), "child added");
        if matches!(
            parent.state(),
            LifecycleState::Starting | LifecycleState::Started
        ) {
            child.start()?;
        }
        parent
            .core()
            .fire(&ContainerEvent::AddChild(child.name().to_string()));
        Ok(())
    }

    /// Remove the child called `name`, stopping it when the parent runs.
    pub(crate) fn remove(&self, parent: &dyn Container, name: &str, detach: impl FnOnce(&C)) -> Option<Arc<C>> {
        let removed = {
            let _guard = self.mutation.lock();
            let current = self.children.load_full();
            let mut next = current.as_ref().clone();
            let removed = next.remove(name)?;
            self.children.store(Arc::new(next));
            removed
        };
        if let Err(e) = removed.stop() {
            error!(parent = %parent.name(), child = %name, error = %e, "removed child failed to stop");
        }
        detach(&removed);
        parent
            .core()
            .fire(&ContainerEvent::RemoveChild(name.to_string()));
        Some(removed)
    }
}

impl<C> fmt::Debug for ChildMap<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.children.load().keys()).finish()
    }
}
