use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{ContainerError, DispatchError};
use crate::server::{Request, Response};

/// One processing step in a container pipeline.
///
/// Valves are shared by every request that passes through the pipeline and must not
/// assume exclusive access to themselves.
pub trait Valve: Send + Sync {
    /// Name used in logs and container events
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process the request, calling `next.invoke(..)` to continue down the chain.
    fn invoke(&self, req: &mut Request, res: &mut Response, next: Next<'_>) -> Result<(), DispatchError>;

    fn start(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    /// Periodic maintenance, called from the owning container's background processor
    fn background_process(&self) {}
}

/// Cursor over the valves that follow the one currently executing.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Valve>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(rest: &'a [Arc<dyn Valve>]) -> Self {
        Self { rest }
    }

    /// Invoke the next valve. At the end of the chain this is a no-op.
    pub fn invoke(self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        match self.rest.split_first() {
            Some((valve, rest)) => valve.invoke(req, res, Next { rest }),
            None => Ok(()),
        }
    }

    /// The valve [`invoke`](Next::invoke) would call
    #[must_use]
    pub fn valve(&self) -> Option<&'a Arc<dyn Valve>> {
        self.rest.first()
    }
}

fn same_valve(a: &Arc<dyn Valve>, b: &Arc<dyn Valve>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Immutable snapshot of a pipeline's valves. The basic valve, when set, is last.
#[derive(Clone, Default)]
pub struct ValveChain {
    valves: Vec<Arc<dyn Valve>>,
    has_basic: bool,
}

impl ValveChain {
    /// Every valve in invocation order, basic last
    #[must_use]
    pub fn valves(&self) -> &[Arc<dyn Valve>] {
        &self.valves
    }

    #[must_use]
    pub fn basic(&self) -> Option<&Arc<dyn Valve>> {
        if self.has_basic {
            self.valves.last()
        } else {
            None
        }
    }

    /// Valves ahead of the basic valve
    #[must_use]
    pub fn intermediate(&self) -> &[Arc<dyn Valve>] {
        let end = self.valves.len() - usize::from(self.has_basic);
        &self.valves[..end]
    }

    fn position(&self, valve: &Arc<dyn Valve>) -> Option<usize> {
        self.valves.iter().position(|v| same_valve(v, valve))
    }
}

/// Ordered valve list of one container.
pub struct Pipeline {
    container: String,
    chain: ArcSwap<ValveChain>,
    mutation: Mutex<()>,
    running: AtomicBool,
}

impl Pipeline {
    #[must_use]
    pub fn new(container: &str) -> Self {
        Self {
            container: container.to_string(),
            chain: ArcSwap::from_pointee(ValveChain::default()),
            mutation: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// A stopped pipeline that already holds its basic valve
    #[must_use]
    pub fn with_basic(container: &str, basic: Arc<dyn Valve>) -> Self {
        Self {
            container: container.to_string(),
            chain: ArcSwap::from_pointee(ValveChain {
                valves: vec![basic],
                has_basic: true,
            }),
            mutation: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ValveChain> {
        self.chain.load_full()
    }

    #[must_use]
    pub fn basic(&self) -> Option<Arc<dyn Valve>> {
        self.chain.load().basic().map(Arc::clone)
    }

    /// First valve to invoke: the first intermediate valve, else the basic valve.
    #[must_use]
    pub fn first(&self) -> Option<Arc<dyn Valve>> {
        self.chain.load().valves.first().map(Arc::clone)
    }

    /// The valve following `valve` in the current snapshot
    #[must_use]
    pub fn next_of(&self, valve: &Arc<dyn Valve>) -> Option<Arc<dyn Valve>> {
        let chain = self.chain.load();
        let pos = chain.position(valve)?;
        chain.valves.get(pos + 1).map(Arc::clone)
    }

    /// Every valve, basic last
    #[must_use]
    pub fn valves(&self) -> Vec<Arc<dyn Valve>> {
        self.chain.load().valves.clone()
    }

    /// Replace the basic valve.
    ///
    /// When running, the new valve is started before the swap; if that fails the
    /// pipeline is left untouched. The old valve is stopped afterwards and a failure
    /// there is only logged.
    pub fn set_basic(&self, valve: Arc<dyn Valve>) -> Result<(), ContainerError> {
        let _guard = self.mutation.lock();
        let current = self.chain.load_full();
        let old = current.basic().map(Arc::clone);
        if let Some(old) = &old {
            if same_valve(old, &valve) {
                return Ok(());
            }
        }
        if self.is_running() {
            valve.start()?;
        }
        let mut next = current.as_ref().clone();
        if next.has_basic {
            next.valves.pop();
        }
        next.valves.push(valve);
        next.has_basic = true;
        self.chain.store(Arc::new(next));
        if let Some(old) = old {
            if self.is_running() {
                if let Err(e) = old.stop() {
                    error!(container = %self.container, valve = old.name(), error = %e, "failed to stop replaced basic valve");
                }
            }
        }
        Ok(())
    }

    /// Insert `valve` immediately before the basic valve, starting it if the pipeline runs.
    ///
    /// A start failure is logged and the valve is still added.
    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        let _guard = self.mutation.lock();
        if self.is_running() {
            if let Err(e) = valve.start() {
                error!(container = %self.container, valve = valve.name(), error = %e, "failed to start added valve");
            }
        }
        let mut next = self.chain.load().as_ref().clone();
        let at = next.valves.len() - usize::from(next.has_basic);
        next.valves.insert(at, valve);
        self.chain.store(Arc::new(next));
    }

    /// Splice `valve` out and stop it if the pipeline runs. Returns `false` when absent.
    pub fn remove_valve(&self, valve: &Arc<dyn Valve>) -> Result<bool, ContainerError> {
        let _guard = self.mutation.lock();
        let current = self.chain.load_full();
        if current.basic().is_some_and(|b| same_valve(b, valve)) {
            return Err(ContainerError::BasicValveRemoval {
                container: self.container.clone(),
            });
        }
        let Some(pos) = current.position(valve) else {
            return Ok(false);
        };
        let mut next = current.as_ref().clone();
        let removed = next.valves.remove(pos);
        self.chain.store(Arc::new(next));
        if self.is_running() {
            if let Err(e) = removed.stop() {
                error!(container = %self.container, valve = removed.name(), error = %e, "failed to stop removed valve");
            }
        }
        Ok(true)
    }

    /// Start every valve. Requires a basic valve; individual failures are logged.
    pub fn start(&self) -> Result<(), ContainerError> {
        let _guard = self.mutation.lock();
        let chain = self.chain.load_full();
        if chain.basic().is_none() {
            return Err(ContainerError::NoBasicValve {
                container: self.container.clone(),
            });
        }
        for valve in chain.valves() {
            if let Err(e) = valve.start() {
                error!(container = %self.container, valve = valve.name(), error = %e, "valve failed to start");
            }
        }
        self.running.store(true, Ordering::Release);
        info!(container = %self.container, valves = chain.valves().len(), "pipeline started");
        Ok(())
    }

    pub fn stop(&self) {
        let _guard = self.mutation.lock();
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for valve in self.chain.load().valves() {
            if let Err(e) = valve.stop() {
                error!(container = %self.container, valve = valve.name(), error = %e, "valve failed to stop");
            }
        }
        debug!(container = %self.container, "pipeline stopped");
    }

    /// Run the request through the chain, starting at [`first`](Pipeline::first).
    pub fn invoke(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let chain = self.chain.load_full();
        if chain.basic().is_none() {
            return Err(DispatchError::from(ContainerError::NoBasicValve {
                container: self.container.clone(),
            }));
        }
        Next::new(chain.valves()).invoke(req, res)
    }

    pub fn background_process(&self) {
        for valve in self.chain.load().valves() {
            valve.background_process();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain = self.chain.load();
        let names: Vec<&str> = chain.valves().iter().map(|v| v.name()).collect();
        f.debug_struct("Pipeline")
            .field("container", &self.container)
            .field("valves", &names)
            .field("running", &self.is_running())
            .finish()
    }
}
