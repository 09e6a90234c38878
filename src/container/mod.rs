//! # Container Module
//!
//! The four-level container tree: [`Engine`] → [`Host`] → [`Context`] → [`Wrapper`].
//!
//! Every container owns a [`Pipeline`](crate::pipeline::Pipeline) whose basic valve
//! hands the request to the matching child, a set of inheritable collaborators, a
//! lifecycle state and optionally a background thread.
//!
//! ## Tree Links
//!
//! Parents hold their children strongly; children reach their parent through a weak
//! link set when they are added. Adding a child that already has a parent fails with
//! [`ContainerError::AlreadyAttached`](crate::error::ContainerError::AlreadyAttached).
//!
//! ## Lifecycle
//!
//! `start` starts the children, then the pipeline, then the container itself, and
//! finally launches the background processor when the container's delay is positive.
//! `stop` runs the same steps in reverse. Children added to a running parent start
//! immediately; removed children are stopped.
//!
//! ## Background Processing
//!
//! A container with a positive delay runs [`process_children`] on its own thread.
//! Descendants with a delay `<= 0` are maintained by the nearest ancestor thread.

mod background;
mod collaborators;
mod context;
mod core;
mod engine;
mod host;
mod wrapper;

pub use background::process_children;
pub use collaborators::{
    bind_loader, current_loader, Collaborators, Loader, LoaderBinding, Manager, Realm,
    Resources,
};
pub use context::{Context, ErrorPage, ErrorPageKey};
pub use core::{
    ChildMap, Container, ContainerCore, ContainerEvent, ContainerKind, ContainerListener,
    LifecycleState,
};
pub use engine::Engine;
pub use host::Host;
pub use wrapper::{Availability, Wrapper};
