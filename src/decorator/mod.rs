//! # Decorator Module
//!
//! Shadowing request/response state for the duration of one dispatch.
//!
//! A [`Request`](crate::server::Request) and a [`Response`](crate::server::Response)
//! each carry an explicit stack of layers on top of their base state. The last layer
//! is the outermost one. Lookups walk from the outermost layer inwards and stop at the
//! first layer that answers; mutations travel inwards and may be swallowed on the way.
//!
//! Two kinds of layer exist:
//!
//! - **dispatch layers** ([`DispatchedRequest`], [`DispatchedResponse`]) are installed
//!   by a [`RequestDispatcher`](crate::dispatcher::RequestDispatcher) and removed by it
//!   when the forward/include returns;
//! - **custom layers** ([`RequestDecorator`], [`ResponseDecorator`]) are pushed by
//!   filters that want to wrap the request or response for the rest of the chain.
//!
//! Every layer has a [`LayerId`]. Removal is by identity, never by position or type,
//! so a layer can be spliced out even when nested dispatches stacked further layers
//! around it while it was active.

pub mod attributes;
mod request;
mod response;

pub use request::{
    merge_parameters, parse_parameters, DispatchedRequest, ParamMap, RequestDecorator,
    RequestLayer,
};
pub use response::{DispatchedResponse, ResponseDecorator, ResponseLayer};

pub(crate) use request::RequestLayerKind;
pub(crate) use response::{Mutation, ResponseLayerKind};

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one decorator layer, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LayerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Index at which a dispatcher inserts its layer into `layers` (outermost last).
///
/// Walks from the outermost layer inwards until it meets the base object or a layer
/// a dispatcher already owns, and returns the slot just outside that point. Custom
/// layers further out stay outside the new layer.
pub(crate) fn dispatch_insertion_index<T>(layers: &[T], is_dispatch: impl Fn(&T) -> bool) -> usize {
    layers.iter().rposition(is_dispatch).map_or(0, |i| i + 1)
}

/// Remove the layer with `id`, keeping every other layer in place.
pub(crate) fn remove_by_id<T>(layers: &mut Vec<T>, id: LayerId, id_of: impl Fn(&T) -> LayerId) -> Option<T> {
    let pos = layers.iter().position(|l| id_of(l) == id)?;
    Some(layers.remove(pos))
}
