//! # Dispatcher Module
//!
//! Forward and include: re-entering the filter/servlet machinery of a context for a
//! different target while the current request is still being processed.
//!
//! ## Overview
//!
//! A [`RequestDispatcher`] is obtained from a context
//! ([`Context::request_dispatcher`](crate::container::Context::request_dispatcher),
//! [`Context::named_dispatcher`](crate::container::Context::named_dispatcher)) or from
//! the request itself ([`Request::request_dispatcher`](crate::server::Request::request_dispatcher)).
//! It is immutable once built and may be used any number of times.
//!
//! ## Forward
//!
//! - fails with [`DispatchError::IllegalState`](crate::error::DispatchError::IllegalState)
//!   when the response is committed, before touching anything;
//! - discards buffered output, keeping the status and headers already set;
//! - path dispatch installs the `dispatch.forward.*` markers from the current view,
//!   unless a forward marker is already visible, so nested forwards keep the values
//!   of the original request;
//! - finishes the response when the target returns successfully.
//!
//! ## Include
//!
//! - never checks the commit state and never discards output;
//! - always installs an "included" response layer: status, header, cookie and
//!   `send_error` calls from the target are dropped;
//! - path dispatch installs the `dispatch.include.*` markers on every call.
//!
//! ## Layer Handling
//!
//! Each call inserts exactly one request layer and one response layer, just outside
//! the outermost dispatch layer already present, and removes exactly those two by
//! identity on every exit path. Custom layers pushed by filters in the meantime stay
//! where they are.

mod core;

pub use core::RequestDispatcher;
