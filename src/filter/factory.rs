use std::sync::Arc;
use tracing::{trace, warn};

use super::{ApplicationFilterChain, DispatcherType, FilterMap, FilterRegistry, FilterTarget};
use crate::container::{Container, Wrapper};
use crate::server::Request;
use crate::servlet::Servlet;

/// `true` when URL pattern `pattern` matches `path`.
///
/// Rules, each of which independently produces a match:
/// exact equality; `/*`; a prefix pattern `/p/*` when the path equals `/p` or
/// continues with `/` after it; an extension pattern `*.ext` when the last path
/// segment ends in a non-empty `.ext`. The empty pattern matches the context root `/`.
#[must_use]
pub fn matches_url(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if pattern == "/*" {
        return true;
    }
    if pattern.is_empty() {
        return path == "/";
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let (pb, rb) = (prefix.as_bytes(), path.as_bytes());
        if rb.starts_with(pb) {
            return rb.len() == pb.len() || rb[pb.len()] == b'/';
        }
        return false;
    }
    if let Some(ext) = pattern.strip_prefix("*.") {
        let rb = path.as_bytes();
        let (Some(slash), Some(period)) = (path.rfind('/'), path.rfind('.')) else {
            return false;
        };
        if period > slash && period != rb.len() - 1 && rb.len() - period == ext.len() + 1 {
            return &rb[period + 1..] == ext.as_bytes();
        }
    }
    false
}

/// `true` when a servlet-name mapping applies to `servlet_name`; `*` matches all.
#[must_use]
pub fn matches_servlet(mapped: &str, servlet_name: Option<&str>) -> bool {
    match servlet_name {
        Some(name) => mapped == "*" || mapped == name,
        None => false,
    }
}

/// Ordered, de-duplicated filter names matching a dispatch.
///
/// URL-pattern mappings are evaluated first, in declaration order; servlet-name
/// mappings follow. Mappings whose dispatch mask excludes `dispatcher_type` are
/// skipped. A `None` dispatch path skips URL matching entirely.
#[must_use]
pub fn match_filter_maps<'a>(
    maps: &'a [FilterMap],
    dispatcher_type: DispatcherType,
    dispatch_path: Option<&str>,
    servlet_name: Option<&str>,
) -> Vec<&'a str> {
    let mut matched: Vec<&'a str> = Vec::new();
    let mut push = |name: &'a str| {
        if !matched.contains(&name) {
            matched.push(name);
        }
    };
    if let Some(path) = dispatch_path {
        for map in maps {
            if !map.dispatch().matches(dispatcher_type) {
                continue;
            }
            if let FilterTarget::UrlPattern(pattern) = map.target() {
                if matches_url(pattern, path) {
                    push(map.filter_name());
                }
            }
        }
    }
    for map in maps {
        if !map.dispatch().matches(dispatcher_type) {
            continue;
        }
        if let FilterTarget::ServletName(name) = map.target() {
            if matches_servlet(name, servlet_name) {
                push(map.filter_name());
            }
        }
    }
    matched
}

/// Populate `chain` from the mappings, resolving each filter name in `registry`.
///
/// A name with no started configuration is a configuration defect: it is logged and
/// skipped.
pub fn populate_chain(
    chain: &mut ApplicationFilterChain,
    maps: &[FilterMap],
    registry: &FilterRegistry,
    dispatcher_type: DispatcherType,
    dispatch_path: Option<&str>,
    servlet_name: &str,
) {
    for name in match_filter_maps(maps, dispatcher_type, dispatch_path, Some(servlet_name)) {
        match registry.get(name) {
            Some(config) => chain.add_filter(Arc::clone(config)),
            None => warn!(filter = %name, servlet = %servlet_name, "filter mapping refers to a filter with no started configuration"),
        }
    }
}

/// Build the filter chain for the current dispatch of `req` to `wrapper`.
///
/// The dispatch type and dispatch path are read from the request. With `reuse` set
/// and security isolation off, the chain parked on the request is recycled instead of
/// allocating a new one; the caller parks it again after releasing it.
pub fn create_filter_chain(
    req: &mut Request,
    wrapper: &Wrapper,
    servlet: Arc<dyn Servlet>,
    reuse: bool,
) -> ApplicationFilterChain {
    let isolated = wrapper
        .runtime_config()
        .is_some_and(|c| c.security_isolation);
    let mut chain = if reuse && !isolated {
        req.take_filter_chain().unwrap_or_default()
    } else {
        ApplicationFilterChain::new()
    };
    chain.release();
    chain.set_servlet(wrapper.name(), servlet);
    chain.set_support(Some(wrapper.instance_support()));

    let Some(context) = wrapper.context() else {
        return chain;
    };
    let maps = context.filter_maps();
    if maps.is_empty() {
        return chain;
    }
    let Some(registry) = context.filter_registry() else {
        warn!(context = %context.name(), "filter mappings present but filters are not started");
        return chain;
    };
    let dispatcher_type = req.dispatcher_type();
    populate_chain(
        &mut chain,
        maps.as_slice(),
        &registry,
        dispatcher_type,
        req.dispatch_path(),
        wrapper.name(),
    );
    trace!(
        servlet = %wrapper.name(),
        dispatcher_type = %dispatcher_type,
        filters = ?chain.filter_names(),
        "filter chain created"
    );
    chain
}
