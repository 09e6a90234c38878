use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use super::collaborators::bind_loader;
use super::{Container, LifecycleState};
use crate::error::ContainerError;

struct Running {
    done: Arc<AtomicBool>,
    interrupt: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Dedicated maintenance thread of one container.
#[derive(Default)]
pub(crate) struct BackgroundProcessor {
    running: Mutex<Option<Running>>,
}

impl BackgroundProcessor {
    pub(crate) fn start(
        &self,
        container: Weak<dyn Container>,
        name: &str,
        delay: Duration,
    ) -> Result<(), ContainerError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let done = Arc::new(AtomicBool::new(false));
        let (interrupt, rx) = mpsc::channel();
        let thread_done = Arc::clone(&done);
        let thread = thread::Builder::new()
            .name(format!("background[{name}]"))
            .spawn(move || run(container, delay, thread_done, rx))
            .map_err(|e| ContainerError::lifecycle(name, format!("background thread: {e}")))?;
        info!(container = %name, delay_secs = delay.as_secs(), "background processor started");
        *running = Some(Running {
            done,
            interrupt,
            thread,
        });
        Ok(())
    }

    /// Set the done flag, interrupt the sleep and join the thread.
    pub(crate) fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.done.store(true, Ordering::Release);
        if running.interrupt.send(()).is_err() {
            debug!("background processor already exited");
        }
        if running.thread.thread().id() == thread::current().id() {
            return;
        }
        if running.thread.join().is_err() {
            error!("background processor thread panicked");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

fn run(container: Weak<dyn Container>, delay: Duration, done: Arc<AtomicBool>, rx: mpsc::Receiver<()>) {
    loop {
        match rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if done.load(Ordering::Acquire) {
            break;
        }
        let Some(container) = container.upgrade() else {
            break;
        };
        process_children(container.as_ref());
    }
    debug!("background processor exiting");
}

/// Run `container`'s maintenance hook, then recurse into every descendant that does
/// not run its own background processor.
pub fn process_children(container: &dyn Container) {
    if container.state() == LifecycleState::Started {
        let _binding = bind_loader(container.loader());
        if catch_unwind(AssertUnwindSafe(|| container.background_process())).is_err() {
            error!(container = %container.name(), "background processing panicked");
        }
    }
    for child in container.child_containers() {
        if child.background_processor_delay() <= 0 {
            process_children(child.as_ref());
        }
    }
}
