//! Error taxonomy for the dispatch core.
//!
//! Two families of errors exist:
//!
//! - [`DispatchError`] travels along the request path. Valves, filters, handlers and
//!   request dispatchers return it, and the core always hands the *same value* back to
//!   its caller after running cleanup and instrumentation.
//! - [`ContainerError`] covers structural and lifecycle operations (adding children,
//!   editing pipelines, declaring filter mappings, starting and stopping containers).
//!
//! Both are plain enums with hand-written `Display` implementations, matching the rest
//! of the crate. `anyhow` is only used at loading boundaries (configuration files,
//! logging initialisation).

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

/// Boxed error used for application failures raised by filters and handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Handler unavailability, either temporary (with a retry hint) or permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailable {
    /// `true` when the handler will never become available again
    pub permanent: bool,
    /// How long a temporary outage is expected to last
    pub retry_after: Option<Duration>,
    /// Human readable reason
    pub message: String,
}

impl Unavailable {
    /// A permanent outage. Requests map to a 404.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            permanent: true,
            retry_after: None,
            message: message.into(),
        }
    }

    /// A temporary outage. Requests map to a 503 with `Retry-After`.
    #[must_use]
    pub fn temporary(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            permanent: false,
            retry_after: Some(retry_after),
            message: message.into(),
        }
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.permanent {
            write!(f, "permanently unavailable: {}", self.message)
        } else {
            match self.retry_after {
                Some(after) => write!(
                    f,
                    "temporarily unavailable for {}s: {}",
                    after.as_secs(),
                    self.message
                ),
                None => write!(f, "temporarily unavailable: {}", self.message),
            }
        }
    }
}

/// Classification of a [`DispatchError`] used by instrumentation only.
///
/// The classification never changes the error that is propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// I/O failure (including client aborts)
    Io,
    /// Failure raised by application code (filters, handlers, unavailability)
    Application,
    /// Contract violations and captured panics
    Runtime,
    /// Anything else
    Opaque,
}

impl ErrorClass {
    /// Stable lower-case name, used for error-page lookup and log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Io => "io",
            ErrorClass::Application => "application",
            ErrorClass::Runtime => "runtime",
            ErrorClass::Opaque => "opaque",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while processing a request.
#[derive(Debug)]
pub enum DispatchError {
    /// I/O failure while reading or writing
    Io(io::Error),
    /// The client went away while the response was being written
    ClientAbort(io::Error),
    /// Application failure raised by a filter or handler
    Servlet {
        /// Description of the failure
        message: String,
        /// Underlying cause, if any
        source: Option<BoxError>,
    },
    /// Runtime failure, e.g. a panic captured at the filter/handler boundary
    Runtime(String),
    /// The target handler is unavailable
    Unavailable(Unavailable),
    /// A call was made in a state where it is not allowed
    IllegalState(String),
    /// Opaque failure from a collaborator
    Other(BoxError),
}

impl DispatchError {
    /// Application failure without a cause
    #[must_use]
    pub fn servlet(message: impl Into<String>) -> Self {
        DispatchError::Servlet {
            message: message.into(),
            source: None,
        }
    }

    /// Application failure wrapping a cause
    #[must_use]
    pub fn servlet_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DispatchError::Servlet {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Contract violation
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        DispatchError::IllegalState(message.into())
    }

    /// Classify for instrumentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Io(_) | DispatchError::ClientAbort(_) => ErrorClass::Io,
            DispatchError::Servlet { .. } | DispatchError::Unavailable(_) => {
                ErrorClass::Application
            }
            DispatchError::Runtime(_) | DispatchError::IllegalState(_) => ErrorClass::Runtime,
            DispatchError::Other(_) => ErrorClass::Opaque,
        }
    }

    /// `true` for client-abort class failures, which are logged quietly
    #[must_use]
    pub fn is_client_abort(&self) -> bool {
        matches!(self, DispatchError::ClientAbort(_))
    }

    /// Build a runtime error from a captured panic payload
    #[must_use]
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        DispatchError::Runtime(message)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Io(e) => write!(f, "I/O error: {e}"),
            DispatchError::ClientAbort(e) => write!(f, "client aborted: {e}"),
            DispatchError::Servlet { message, .. } => write!(f, "{message}"),
            DispatchError::Runtime(message) => write!(f, "runtime failure: {message}"),
            DispatchError::Unavailable(u) => write!(f, "{u}"),
            DispatchError::IllegalState(message) => write!(f, "illegal state: {message}"),
            DispatchError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl StdError for DispatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DispatchError::Io(e) | DispatchError::ClientAbort(e) => Some(e),
            DispatchError::Servlet {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            DispatchError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for DispatchError {
    fn from(e: io::Error) -> Self {
        DispatchError::Io(e)
    }
}

impl From<Unavailable> for DispatchError {
    fn from(u: Unavailable) -> Self {
        DispatchError::Unavailable(u)
    }
}

/// Error raised by structural and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// A sibling with the same name already exists
    DuplicateChild {
        /// Parent container name
        parent: String,
        /// Rejected child name
        child: String,
    },
    /// The child already belongs to another parent
    AlreadyAttached {
        /// Rejected child name
        child: String,
    },
    /// A start or stop step failed
    LifecycleFailure {
        /// Component that failed
        component: String,
        /// Reason reported by the component
        reason: String,
    },
    /// A filter mapping references something invalid
    InvalidFilterMap {
        /// Filter named by the mapping
        filter: String,
        /// Why the mapping was rejected
        reason: String,
    },
    /// A filter name is not declared
    UnknownFilter {
        /// The missing filter name
        filter: String,
    },
    /// The pipeline has no basic valve
    NoBasicValve {
        /// Owning container name
        container: String,
    },
    /// `remove_valve` was called with the basic valve
    BasicValveRemoval {
        /// Owning container name
        container: String,
    },
    /// A servlet mapping is malformed or points at an unknown handler
    InvalidServletMapping {
        /// Offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ContainerError {
    /// Shorthand for a lifecycle failure
    #[must_use]
    pub fn lifecycle(component: impl Into<String>, reason: impl Into<String>) -> Self {
        ContainerError::LifecycleFailure {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::DuplicateChild { parent, child } => write!(
                f,
                "container '{parent}' already has a child named '{child}'"
            ),
            ContainerError::AlreadyAttached { child } => {
                write!(f, "container '{child}' is already attached to a parent")
            }
            ContainerError::LifecycleFailure { component, reason } => {
                write!(f, "lifecycle failure in '{component}': {reason}")
            }
            ContainerError::InvalidFilterMap { filter, reason } => {
                write!(f, "invalid mapping for filter '{filter}': {reason}")
            }
            ContainerError::UnknownFilter { filter } => {
                write!(f, "filter '{filter}' is not defined")
            }
            ContainerError::NoBasicValve { container } => {
                write!(f, "pipeline of '{container}' has no basic valve")
            }
            ContainerError::BasicValveRemoval { container } => write!(
                f,
                "the basic valve of '{container}' cannot be removed, replace it with set_basic"
            ),
            ContainerError::InvalidServletMapping { pattern, reason } => {
                write!(f, "invalid servlet mapping '{pattern}': {reason}")
            }
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<ContainerError> for DispatchError {
    fn from(e: ContainerError) -> Self {
        DispatchError::IllegalState(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            DispatchError::Io(io::Error::other("x")).class(),
            ErrorClass::Io
        );
        assert_eq!(
            DispatchError::ClientAbort(io::Error::other("x")).class(),
            ErrorClass::Io
        );
        assert_eq!(DispatchError::servlet("x").class(), ErrorClass::Application);
        assert_eq!(
            DispatchError::Runtime("x".into()).class(),
            ErrorClass::Runtime
        );
        assert_eq!(
            DispatchError::Other("boom".into()).class(),
            ErrorClass::Opaque
        );
    }

    #[test]
    fn test_panic_payload_message() {
        let err = DispatchError::from_panic(Box::new("kaboom"));
        assert_eq!(err.to_string(), "runtime failure: kaboom");
        let err = DispatchError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "runtime failure: owned");
    }

    #[test]
    fn test_unavailable_display() {
        let u = Unavailable::temporary("warming up", Duration::from_secs(30));
        assert_eq!(u.to_string(), "temporarily unavailable for 30s: warming up");
        assert!(!u.permanent);
        assert!(Unavailable::permanent("gone").permanent);
    }
}
