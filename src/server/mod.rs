//! Container-level request and response objects.
//!
//! Socket I/O and HTTP parsing live outside this crate. A connector builds a
//! [`Request`] from whatever it parsed, hands in an [`OutputSink`] for the response
//! bytes, and calls [`Engine::service`](crate::container::Engine::service).

mod request;
mod response;

pub use request::{ErrorInfo, Request};
pub use response::Response;

use smallvec::SmallVec;
use std::io;
use std::sync::Arc;

use crate::container::{Context, Host, Wrapper};

/// Maximum number of headers kept inline before spilling to the heap
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage: names are shared `Arc<str>` so cloning a header list is cheap.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// A response cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Destination for committed response bytes.
///
/// Any `std::io::Write + Send` is a sink. Failures surface as client-abort errors.
pub trait OutputSink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

impl<W: io::Write + Send> OutputSink for W {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(self)
    }
}

/// Result of request mapping: the containers selected for this request.
#[derive(Debug, Clone, Default)]
pub struct MappingData {
    pub host: Option<Arc<Host>>,
    pub context: Option<Arc<Context>>,
    pub wrapper: Option<Arc<Wrapper>>,
}

impl MappingData {
    pub fn recycle(&mut self) {
        self.host = None;
        self.context = None;
        self.wrapper = None;
    }
}

/// Reason phrase for a status code, falling back to an empty string
#[must_use]
pub fn status_reason(status: http::StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}
