//! # Filter Module
//!
//! Dispatch-aware filter chains.
//!
//! A context declares [`FilterDef`]s and an ordered list of [`FilterMap`]s. When the
//! context starts, every definition is instantiated into an
//! [`ApplicationFilterConfig`] held by the context's [`FilterRegistry`]. For each
//! dispatch to a servlet, [`create_filter_chain`] selects the matching configurations
//! and returns an [`ApplicationFilterChain`] that runs them and then the servlet.
//!
//! ## Matching
//!
//! Mappings are scanned twice in declaration order: first the URL-pattern mappings
//! against the dispatch path, then the servlet-name mappings against the target
//! servlet. Only mappings whose [`DispatchMask`] contains the current
//! [`DispatcherType`] take part. See [`match_filter_maps`].

mod chain;
mod config;
mod def;
mod dispatch_type;
mod factory;

pub use chain::ApplicationFilterChain;
pub use config::{ApplicationFilterConfig, FilterRegistry};
pub use def::{Filter, FilterChain, FilterDef, FilterFactory, FilterMap, FilterMaps, FilterTarget};
pub use dispatch_type::{DispatchMask, DispatcherType};
pub use factory::{create_filter_chain, match_filter_maps, matches_servlet, matches_url, populate_chain};
