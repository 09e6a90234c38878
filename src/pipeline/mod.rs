//! # Pipeline Module
//!
//! Each container owns a [`Pipeline`]: an ordered list of [`Valve`]s ending in exactly
//! one *basic* valve that hands the request to the next container level.
//!
//! ## Invocation
//!
//! The pipeline does not drive its valves. [`Pipeline::invoke`] calls the first valve
//! and passes it a [`Next`] cursor over the rest of the chain; a valve continues by
//! calling [`Next::invoke`]. A valve that returns without doing so ends processing at
//! that point, which is how short-circuit responses such as "service unavailable" work.
//!
//! ## Topology changes
//!
//! The valve list is a copy-on-write snapshot stored in an [`arc_swap::ArcSwap`].
//! Requests read it without locking; `add_valve`, `remove_valve` and `set_basic`
//! build a new snapshot under a writer mutex and swap it in. A request keeps the
//! snapshot it started with, so a valve removed mid-request still finishes that
//! request.

mod core;

pub use core::{Next, Pipeline, Valve, ValveChain};
