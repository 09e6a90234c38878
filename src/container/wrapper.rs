use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use super::{Container, ContainerCore, ContainerKind, Context};
use crate::error::{DispatchError, Unavailable};
use crate::instrumentation::{InstanceEventType, InstanceListener, InstanceSupport};
use crate::servlet::{Servlet, ServletConfig, ServletFactory};
use crate::valves::WrapperValve;

const PERMANENT: u64 = u64::MAX;
const DEFAULT_RETRY: Duration = Duration::from_secs(60);

/// Availability of a wrapper's servlet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Unavailable for about this long
    Temporary(Duration),
    Permanent,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(PERMANENT - 1))
}

#[derive(Default)]
struct InstancePool {
    idle: Vec<Arc<dyn Servlet>>,
    created: usize,
}

/// Leaf container: one servlet definition and its instances.
///
/// Servlets load lazily on first [`allocate`](Wrapper::allocate) unless a non-negative
/// load-on-startup order makes the owning context load them when it starts. A servlet
/// that reports [`Servlet::is_single_threaded`] is pooled: each instance serves one
/// request at a time and `allocate` blocks once the pool bound is reached.
pub struct Wrapper {
    core: ContainerCore,
    parent: RwLock<Weak<Context>>,
    factory: ServletFactory,
    init_params: RwLock<BTreeMap<String, String>>,
    load_on_startup: AtomicI32,
    max_instances: AtomicUsize,
    instance: RwLock<Option<Arc<dyn Servlet>>>,
    single_threaded: AtomicBool,
    load_lock: Mutex<()>,
    pool: Mutex<InstancePool>,
    pool_available: Condvar,
    count_allocated: AtomicUsize,
    available: AtomicU64,
    unloading: AtomicBool,
    support: Arc<InstanceSupport>,
    request_count: AtomicU64,
    error_count: AtomicU64,
    processing_time_ns: AtomicU64,
    max_time_ns: AtomicU64,
}

impl Wrapper {
    /// Wrapper creating instances through `factory`
    pub fn new(name: &str, factory: ServletFactory) -> Arc<Wrapper> {
        Arc::new_cyclic(|weak: &Weak<Wrapper>| {
            let weak = Weak::clone(weak);
            let this: Weak<dyn Container> = weak;
            Wrapper {
                core: ContainerCore::new(name, ContainerKind::Wrapper, Arc::new(WrapperValve), this),
                parent: RwLock::new(Weak::new()),
                factory,
                init_params: RwLock::new(BTreeMap::new()),
                load_on_startup: AtomicI32::new(-1),
                max_instances: AtomicUsize::new(0),
                instance: RwLock::new(None),
                single_threaded: AtomicBool::new(false),
                load_lock: Mutex::new(()),
                pool: Mutex::new(InstancePool::default()),
                pool_available: Condvar::new(),
                count_allocated: AtomicUsize::new(0),
                available: AtomicU64::new(0),
                unloading: AtomicBool::new(false),
                support: Arc::new(InstanceSupport::new(name)),
                request_count: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                processing_time_ns: AtomicU64::new(0),
                max_time_ns: AtomicU64::new(0),
            }
        })
    }

    /// Wrapper around one existing instance. A single-threaded instance gets a pool of one.
    pub fn with_servlet(name: &str, servlet: Arc<dyn Servlet>) -> Arc<Wrapper> {
        let single = servlet.is_single_threaded();
        let factory: ServletFactory = Arc::new(move || Ok(Arc::clone(&servlet)));
        let wrapper = Self::new(name, factory);
        if single {
            wrapper.set_max_instances(1);
        }
        wrapper
    }

    /// Owning context
    #[must_use]
    pub fn context(&self) -> Option<Arc<Context>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn attach(&self, parent: &Arc<Context>) -> Result<(), crate::error::ContainerError> {
        let mut slot = self.parent.write();
        if slot.upgrade().is_some() {
            return Err(crate::error::ContainerError::AlreadyAttached {
                child: self.name().to_string(),
            });
        }
        *slot = Arc::downgrade(parent);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        *self.parent.write() = Weak::new();
    }

    pub fn set_init_param(&self, name: &str, value: &str) {
        self.init_params
            .write()
            .insert(name.to_string(), value.to_string());
    }

    #[must_use]
    pub fn init_param(&self, name: &str) -> Option<String> {
        self.init_params.read().get(name).cloned()
    }

    #[must_use]
    pub fn load_on_startup(&self) -> i32 {
        self.load_on_startup.load(Ordering::Relaxed)
    }

    /// Non-negative values load the servlet when the context starts, lowest first.
    pub fn set_load_on_startup(&self, order: i32) {
        self.load_on_startup.store(order, Ordering::Relaxed);
    }

    /// Pool bound for single-threaded servlets; `0` uses the runtime configuration.
    pub fn set_max_instances(&self, max: usize) {
        self.max_instances.store(max, Ordering::Relaxed);
    }

    #[must_use]
    pub fn max_instances(&self) -> usize {
        match self.max_instances.load(Ordering::Relaxed) {
            0 => self.runtime_config().map_or(20, |c| c.max_instances.max(1)),
            n => n,
        }
    }

    #[must_use]
    pub fn instance_support(&self) -> Arc<InstanceSupport> {
        Arc::clone(&self.support)
    }

    pub fn add_instance_listener(&self, listener: Arc<dyn InstanceListener>) {
        self.support.add_listener(listener);
    }

    // ------------------------------------------------------------ availability

    #[must_use]
    pub fn availability(&self) -> Availability {
        match self.available.load(Ordering::Acquire) {
            0 => Availability::Available,
            PERMANENT => Availability::Permanent,
            until => {
                let now = now_millis();
                if now >= until {
                    // expired; a concurrent update wins
                    if self
                        .available
                        .compare_exchange(until, 0, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        info!(wrapper = %self.name(), "servlet available again");
                    }
                    Availability::Available
                } else {
                    Availability::Temporary(Duration::from_millis(until - now))
                }
            }
        }
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.availability() != Availability::Available
    }

    #[must_use]
    pub fn is_permanently_unavailable(&self) -> bool {
        self.availability() == Availability::Permanent
    }

    /// Record that the servlet reported itself unavailable.
    pub fn unavailable(&self, unavailable: &Unavailable) {
        warn!(wrapper = %self.name(), reason = %unavailable, "marking servlet unavailable");
        if unavailable.permanent {
            self.available.store(PERMANENT, Ordering::Release);
        } else {
            let retry = unavailable.retry_after.unwrap_or(DEFAULT_RETRY);
            let millis = u64::try_from(retry.as_millis()).unwrap_or(PERMANENT - 1);
            let until = now_millis().saturating_add(millis).min(PERMANENT - 1);
            self.available.store(until, Ordering::Release);
        }
    }

    pub fn set_available(&self) {
        self.available.store(0, Ordering::Release);
    }

    // -------------------------------------------------------------- instances

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.instance.read().is_some() || self.pool.lock().created > 0
    }

    #[must_use]
    pub fn is_single_threaded(&self) -> bool {
        self.single_threaded.load(Ordering::Acquire)
    }

    /// Instances currently handed out
    #[must_use]
    pub fn count_allocated(&self) -> usize {
        self.count_allocated.load(Ordering::Acquire)
    }

    /// Pooled instances created so far
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.pool.lock().created
    }

    fn servlet_config(&self) -> ServletConfig {
        ServletConfig {
            servlet_name: self.name().to_string(),
            init_params: self.init_params.read().clone(),
        }
    }

    /// Create and initialise one instance
    fn create_instance(&self) -> Result<Arc<dyn Servlet>, DispatchError> {
        let servlet = (self.factory)()?;
        self.support.fire(InstanceEventType::BeforeInit, None, None);
        let result = servlet.init(&self.servlet_config());
        self.support.fire(
            InstanceEventType::AfterInit,
            None,
            result.as_ref().err().map(DispatchError::class),
        );
        if let Err(e) = result {
            if let DispatchError::Unavailable(u) = &e {
                self.unavailable(u);
            }
            error!(wrapper = %self.name(), error = %e, "servlet init failed");
            return Err(e);
        }
        debug!(wrapper = %self.name(), "servlet instance initialised");
        Ok(servlet)
    }

    /// Load the servlet if it is not loaded yet.
    pub fn load(&self) -> Result<(), DispatchError> {
        if self.is_loaded() {
            return Ok(());
        }
        let _guard = self.load_lock.lock();
        if self.is_loaded() {
            return Ok(());
        }
        let servlet = self.create_instance()?;
        if servlet.is_single_threaded() {
            self.single_threaded.store(true, Ordering::Release);
            let mut pool = self.pool.lock();
            pool.created += 1;
            pool.idle.push(servlet);
        } else {
            *self.instance.write() = Some(servlet);
        }
        info!(wrapper = %self.name(), single_threaded = self.is_single_threaded(), "servlet loaded");
        Ok(())
    }

    /// Obtain an instance to service one request.
    ///
    /// Fails with [`DispatchError::Unavailable`] while the servlet is unavailable.
    pub fn allocate(&self) -> Result<Arc<dyn Servlet>, DispatchError> {
        if self.unloading.load(Ordering::Acquire) {
            return Err(DispatchError::Unavailable(Unavailable::temporary(
                format!("servlet {} is being unloaded", self.name()),
                DEFAULT_RETRY,
            )));
        }
        match self.availability() {
            Availability::Available => {}
            Availability::Permanent => {
                return Err(DispatchError::Unavailable(Unavailable::permanent(format!(
                    "servlet {} is permanently unavailable",
                    self.name()
                ))))
            }
            Availability::Temporary(left) => {
                return Err(DispatchError::Unavailable(Unavailable::temporary(
                    format!("servlet {} is unavailable", self.name()),
                    left,
                )))
            }
        }
        self.load()?;

        if !self.is_single_threaded() {
            if let Some(servlet) = self.instance.read().as_ref() {
                self.count_allocated.fetch_add(1, Ordering::AcqRel);
                return Ok(Arc::clone(servlet));
            }
            return Err(DispatchError::illegal_state(format!(
                "servlet {} was unloaded during allocation",
                self.name()
            )));
        }

        let max = self.max_instances();
        let mut pool = self.pool.lock();
        loop {
            if let Some(servlet) = pool.idle.pop() {
                self.count_allocated.fetch_add(1, Ordering::AcqRel);
                return Ok(servlet);
            }
            if pool.created < max {
                pool.created += 1;
                drop(pool);
                return match self.create_instance() {
                    Ok(servlet) => {
                        self.count_allocated.fetch_add(1, Ordering::AcqRel);
                        Ok(servlet)
                    }
                    Err(e) => {
                        self.pool.lock().created -= 1;
                        self.pool_available.notify_one();
                        Err(e)
                    }
                };
            }
            self.pool_available.wait(&mut pool);
        }
    }

    /// Return an instance obtained from [`allocate`](Wrapper::allocate).
    pub fn deallocate(&self, servlet: Arc<dyn Servlet>) {
        self.count_allocated.fetch_sub(1, Ordering::AcqRel);
        if !self.is_single_threaded() {
            return;
        }
        self.pool.lock().idle.push(servlet);
        self.pool_available.notify_one();
    }

    /// Destroy every instance. The servlet loads again on next allocation.
    pub fn unload(&self) {
        let _guard = self.load_lock.lock();
        if !self.is_loaded() {
            return;
        }
        self.unloading.store(true, Ordering::Release);
        let allocated = self.count_allocated();
        if allocated > 0 {
            warn!(wrapper = %self.name(), allocated, "unloading servlet with instances still allocated");
        }
        let mut instances: Vec<Arc<dyn Servlet>> = Vec::new();
        if let Some(servlet) = self.instance.write().take() {
            instances.push(servlet);
        }
        {
            let mut pool = self.pool.lock();
            instances.append(&mut pool.idle);
            pool.created = 0;
        }
        for servlet in instances {
            self.support.fire(InstanceEventType::BeforeDestroy, None, None);
            servlet.destroy();
            self.support.fire(InstanceEventType::AfterDestroy, None, None);
        }
        self.single_threaded.store(false, Ordering::Release);
        self.unloading.store(false, Ordering::Release);
        info!(wrapper = %self.name(), "servlet unloaded");
    }

    // ------------------------------------------------------------------ stats

    pub(crate) fn record_request(&self, elapsed: Duration, failed: bool) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.processing_time_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_time_ns.fetch_max(ns, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processing_time(&self) -> Duration {
        Duration::from_nanos(self.processing_time_ns.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn max_time(&self) -> Duration {
        Duration::from_nanos(self.max_time_ns.load(Ordering::Relaxed))
    }
}

impl Container for Wrapper {
    fn core(&self) -> &ContainerCore {
        &self.core
    }

    fn parent_container(&self) -> Option<Arc<dyn Container>> {
        self.context().map(|c| c as Arc<dyn Container>)
    }

    fn child_containers(&self) -> Vec<Arc<dyn Container>> {
        Vec::new()
    }

    fn on_stop(&self) {
        self.unload();
    }
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("availability", &self.availability())
            .field("allocated", &self.count_allocated())
            .finish()
    }
}
