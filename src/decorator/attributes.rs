//! Well-known request attribute names.
//!
//! The ten dispatch markers are never stored in the general attribute map of a
//! request while a dispatch layer is active: each [`DispatchedRequest`](super::DispatchedRequest)
//! keeps them in dedicated slots so that nested dispatches can shadow and restore them.

/// Original request URI of the first forward in a chain
pub const FORWARD_REQUEST_URI: &str = "dispatch.forward.request_uri";
/// Original context path of the first forward in a chain
pub const FORWARD_CONTEXT_PATH: &str = "dispatch.forward.context_path";
/// Original servlet path of the first forward in a chain
pub const FORWARD_SERVLET_PATH: &str = "dispatch.forward.servlet_path";
/// Original path info of the first forward in a chain
pub const FORWARD_PATH_INFO: &str = "dispatch.forward.path_info";
/// Original query string of the first forward in a chain
pub const FORWARD_QUERY_STRING: &str = "dispatch.forward.query_string";
/// Request URI of the include target
pub const INCLUDE_REQUEST_URI: &str = "dispatch.include.request_uri";
/// Context path of the include target
pub const INCLUDE_CONTEXT_PATH: &str = "dispatch.include.context_path";
/// Servlet path of the include target
pub const INCLUDE_SERVLET_PATH: &str = "dispatch.include.servlet_path";
/// Path info of the include target
pub const INCLUDE_PATH_INFO: &str = "dispatch.include.path_info";
/// Query string of the include target
pub const INCLUDE_QUERY_STRING: &str = "dispatch.include.query_string";

/// Status code that triggered an error dispatch
pub const ERROR_STATUS_CODE: &str = "error.status_code";
/// Message of the failure that triggered an error dispatch
pub const ERROR_MESSAGE: &str = "error.message";
/// Request URI that failed
pub const ERROR_REQUEST_URI: &str = "error.request_uri";
/// Handler that was running when the failure occurred
pub const ERROR_SERVLET_NAME: &str = "error.servlet_name";
/// Error class name (`io`, `application`, `runtime`, `opaque`)
pub const ERROR_EXCEPTION_TYPE: &str = "error.exception_type";

/// One of the ten dispatch marker attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    IncludeRequestUri,
    IncludeContextPath,
    IncludeServletPath,
    IncludePathInfo,
    IncludeQueryString,
    ForwardRequestUri,
    ForwardContextPath,
    ForwardServletPath,
    ForwardPathInfo,
    ForwardQueryString,
}

impl Marker {
    /// Every marker, include markers first
    pub const ALL: [Marker; 10] = [
        Marker::IncludeRequestUri,
        Marker::IncludeContextPath,
        Marker::IncludeServletPath,
        Marker::IncludePathInfo,
        Marker::IncludeQueryString,
        Marker::ForwardRequestUri,
        Marker::ForwardContextPath,
        Marker::ForwardServletPath,
        Marker::ForwardPathInfo,
        Marker::ForwardQueryString,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Marker::IncludeRequestUri => INCLUDE_REQUEST_URI,
            Marker::IncludeContextPath => INCLUDE_CONTEXT_PATH,
            Marker::IncludeServletPath => INCLUDE_SERVLET_PATH,
            Marker::IncludePathInfo => INCLUDE_PATH_INFO,
            Marker::IncludeQueryString => INCLUDE_QUERY_STRING,
            Marker::ForwardRequestUri => FORWARD_REQUEST_URI,
            Marker::ForwardContextPath => FORWARD_CONTEXT_PATH,
            Marker::ForwardServletPath => FORWARD_SERVLET_PATH,
            Marker::ForwardPathInfo => FORWARD_PATH_INFO,
            Marker::ForwardQueryString => FORWARD_QUERY_STRING,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Marker> {
        Marker::ALL.into_iter().find(|m| m.name() == name)
    }

    #[must_use]
    pub fn is_forward(self) -> bool {
        self.index() >= 5
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}
