//! # brrtvalve
//!
//! **brrtvalve** is the per-request dispatch core of a servlet-style HTTP container: valve
//! pipelines threaded through a four-level container tree, dispatch-type-aware filter
//! chains, and forward/include request dispatchers that shadow request and response
//! state through removable decorator layers.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`pipeline`]** - Valve chains with a terminal ("basic") valve, copy-on-write topology
//! - **[`container`]** - [`Engine`](container::Engine), [`Host`](container::Host),
//!   [`Context`](container::Context) and [`Wrapper`](container::Wrapper), lifecycle,
//!   collaborators and background processing
//! - **[`valves`]** - Basic valves per level plus metrics, tracing and maintenance valves
//! - **[`mapper`]** - Host/context/servlet mapping and path decomposition
//! - **[`filter`]** - Filter definitions and mappings, the matching algorithm and the
//!   cursor-driven filter chain
//! - **[`dispatcher`]** - `forward` and `include`
//! - **[`decorator`]** - Shadowing request/response layers with identity-based removal
//! - **[`server`]** - Container-level [`Request`](server::Request) and [`Response`](server::Response)
//! - **[`servlet`]** - The handler contract
//! - **[`instrumentation`]** - Before/after instance events
//! - **[`runtime_config`]** / **[`logging`]** - Configuration and `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Connector
//!     participant Engine as Engine pipeline
//!     participant Host as Host pipeline
//!     participant Context as Context pipeline
//!     participant Wrapper as Wrapper pipeline
//!     participant Chain as Filter chain
//!     participant Servlet
//!
//!     Connector->>Engine: Engine::service(req, res)
//!     Engine->>Engine: map host / context / wrapper
//!     Engine->>Host: EngineValve
//!     Host->>Context: HostValve (loader bound)
//!     Context->>Wrapper: ContextValve
//!     Wrapper->>Wrapper: allocate servlet
//!     Wrapper->>Chain: create_filter_chain(REQUEST, request path)
//!     Chain->>Chain: filter 1 .. filter n
//!     Chain->>Servlet: service(req, res)
//!     Servlet-->>Chain: Ok / Err
//!     Chain-->>Wrapper: result (unchanged)
//!     Wrapper->>Wrapper: release chain, deallocate
//!     Wrapper-->>Host: result
//!     Host->>Host: error page (ERROR dispatch)
//!     Host-->>Engine: Ok
//!     Engine->>Connector: finish response
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brrtvalve::container::{Container, Context, Engine, Host, Wrapper};
//! use brrtvalve::server::{Request, Response};
//! use brrtvalve::servlet::servlet_fn;
//!
//! let engine = Engine::new("catalina");
//! let host = Host::new("localhost");
//! let context = Context::new("/app");
//! context.add_wrapper(Wrapper::with_servlet("hello", servlet_fn(|_req, res| {
//!     res.write_str("hello")
//! })))?;
//! context.add_servlet_mapping("/hello", "hello")?;
//! host.add_context(context)?;
//! engine.add_host(host)?;
//! engine.start()?;
//!
//! let mut req = Request::get("/app/hello");
//! let mut res = engine.create_response();
//! engine.service(&mut req, &mut res);
//! assert_eq!(res.body_string(), "hello");
//! ```

pub mod container;
pub mod decorator;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod ids;
pub mod instrumentation;
pub mod logging;
pub mod mapper;
pub mod pipeline;
pub mod runtime_config;
pub mod server;
pub mod servlet;
pub mod valves;

pub use container::{Container, Context, Engine, Host, Wrapper};
pub use dispatcher::RequestDispatcher;
pub use error::{ContainerError, DispatchError, Unavailable};
pub use filter::{DispatcherType, Filter, FilterChain};
pub use pipeline::{Next, Pipeline, Valve};
pub use server::{Request, Response};
pub use servlet::Servlet;
