//! Request mapping.
//!
//! Resolves a request to host, context and wrapper and splits its path into context
//! path, servlet path and path info. Servlet mappings are checked in this order:
//! context root (`""`), exact, longest path prefix (`/x/*`), extension (`*.ext`),
//! default (`/`).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::container::{Context, Engine, Host, Wrapper};
use crate::error::ContainerError;
use crate::server::Request;

/// Parsed servlet URL pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServletPattern {
    /// `""`: the context root only
    ContextRoot,
    /// `/`
    Default,
    Exact(String),
    /// `/x/*`, stored without the trailing `/*` (empty for `/*`)
    Prefix(String),
    /// `*.ext`, stored without the leading `*.`
    Extension(String),
}

impl ServletPattern {
    pub fn parse(pattern: &str) -> Result<Self, ContainerError> {
        let invalid = |reason: &str| ContainerError::InvalidServletMapping {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        if pattern.is_empty() {
            return Ok(ServletPattern::ContextRoot);
        }
        if pattern == "/" {
            return Ok(ServletPattern::Default);
        }
        if let Some(ext) = pattern.strip_prefix("*.") {
            if ext.is_empty() || ext.contains('/') {
                return Err(invalid("extension must be non-empty and contain no '/'"));
            }
            return Ok(ServletPattern::Extension(ext.to_string()));
        }
        if !pattern.starts_with('/') {
            return Err(invalid("pattern must start with '/' or '*.'"));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(invalid("wildcard allowed only at the end"));
            }
            return Ok(ServletPattern::Prefix(prefix.to_string()));
        }
        if pattern.contains('*') {
            return Err(invalid("wildcard allowed only at the end"));
        }
        Ok(ServletPattern::Exact(pattern.to_string()))
    }
}

/// Outcome of servlet mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedServlet {
    pub wrapper: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
}

/// Servlet mappings of one context.
#[derive(Debug, Clone, Default)]
pub struct ServletMappings {
    patterns: BTreeMap<String, String>,
    context_root: Option<String>,
    default: Option<String>,
    exact: BTreeMap<String, String>,
    /// longest prefix first
    prefixes: Vec<(String, String)>,
    extensions: BTreeMap<String, String>,
}

impl ServletMappings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `pattern` to `wrapper`, replacing any previous mapping of the pattern.
    pub fn add(&mut self, pattern: &str, wrapper: &str) -> Result<(), ContainerError> {
        let parsed = ServletPattern::parse(pattern)?;
        self.remove(pattern);
        let wrapper = wrapper.to_string();
        match parsed {
            ServletPattern::ContextRoot => self.context_root = Some(wrapper.clone()),
            ServletPattern::Default => self.default = Some(wrapper.clone()),
            ServletPattern::Exact(path) => {
                self.exact.insert(path, wrapper.clone());
            }
            ServletPattern::Prefix(prefix) => {
                self.prefixes.push((prefix, wrapper.clone()));
                self.prefixes
                    .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
            }
            ServletPattern::Extension(ext) => {
                self.extensions.insert(ext, wrapper.clone());
            }
        }
        self.patterns.insert(pattern.to_string(), wrapper);
        Ok(())
    }

    /// Remove a mapping, returning the wrapper name it pointed at
    pub fn remove(&mut self, pattern: &str) -> Option<String> {
        let wrapper = self.patterns.remove(pattern)?;
        match ServletPattern::parse(pattern) {
            Ok(ServletPattern::ContextRoot) => self.context_root = None,
            Ok(ServletPattern::Default) => self.default = None,
            Ok(ServletPattern::Exact(path)) => {
                self.exact.remove(&path);
            }
            Ok(ServletPattern::Prefix(prefix)) => self.prefixes.retain(|(p, _)| *p != prefix),
            Ok(ServletPattern::Extension(ext)) => {
                self.extensions.remove(&ext);
            }
            Err(_) => {}
        }
        Some(wrapper)
    }

    /// Remove every mapping pointing at `wrapper`
    pub fn remove_wrapper(&mut self, wrapper: &str) {
        for pattern in self.patterns_for(wrapper) {
            self.remove(&pattern);
        }
    }

    #[must_use]
    pub fn find(&self, pattern: &str) -> Option<&str> {
        self.patterns.get(pattern).map(String::as_str)
    }

    #[must_use]
    pub fn patterns_for(&self, wrapper: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, w)| w.as_str() == wrapper)
            .map(|(p, _)| p.clone())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Map a path relative to the context (starting with `/`).
    #[must_use]
    pub fn map(&self, path: &str) -> Option<MappedServlet> {
        let mapped = |wrapper: &String, servlet_path: &str, path_info: Option<&str>| MappedServlet {
            wrapper: wrapper.clone(),
            servlet_path: servlet_path.to_string(),
            path_info: path_info.map(str::to_string),
        };
        if path == "/" {
            if let Some(w) = &self.context_root {
                return Some(mapped(w, "", Some("/")));
            }
        }
        if let Some(w) = self.exact.get(path) {
            return Some(mapped(w, path, None));
        }
        for (prefix, w) in &self.prefixes {
            if path == prefix {
                return Some(mapped(w, path, None));
            }
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if rest.starts_with('/') {
                    return Some(mapped(w, prefix, Some(rest)));
                }
            }
        }
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        if let Some((_, ext)) = last_segment.rsplit_once('.') {
            if let Some(w) = self.extensions.get(ext) {
                return Some(mapped(w, path, None));
            }
        }
        self.default.as_ref().map(|w| mapped(w, path, None))
    }
}

/// Collapse `.`, `..` and repeated slashes. `None` when the path is relative or
/// escapes the root.
#[must_use]
pub fn normalize(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    let mut out = String::with_capacity(path.len());
    for s in &segments {
        out.push('/');
        out.push_str(s);
    }
    if trailing || out.is_empty() {
        out.push('/');
    }
    Some(out)
}

/// Select the host for `server_name`: exact name, then alias, then the default host.
#[must_use]
pub fn map_host(engine: &Engine, server_name: &str) -> Option<Arc<Host>> {
    let name = server_name.to_ascii_lowercase();
    engine
        .find_host(&name)
        .or_else(|| engine.hosts().into_iter().find(|h| h.has_alias(&name)))
        .or_else(|| engine.default_host().and_then(|d| engine.find_host(&d)))
}

/// Select the context whose path is the longest prefix of `uri`
#[must_use]
pub fn map_context(host: &Host, uri: &str) -> Option<Arc<Context>> {
    host.contexts()
        .into_iter()
        .filter(|c| {
            let path = c.path();
            path.is_empty()
                || uri == path
                || (uri.starts_with(path) && uri.as_bytes().get(path.len()) == Some(&b'/'))
        })
        .max_by_key(|c| c.path().len())
}

/// Map `req` onto the container tree of `engine`, filling its mapping data and path
/// decomposition. Returns `false` when the request URI cannot be normalised.
pub fn map_request(engine: &Engine, req: &mut Request) -> bool {
    let Some(uri) = normalize(req.base_request_uri()) else {
        return false;
    };
    req.mapping_mut().recycle();
    let Some(host) = map_host(engine, req.server_name()) else {
        return true;
    };
    req.mapping_mut().host = Some(Arc::clone(&host));
    let Some(context) = map_context(&host, &uri) else {
        return true;
    };
    let within = match &uri[context.path().len()..] {
        "" => "/",
        rest => rest,
    };
    let wrapper: Option<Arc<Wrapper>> = match context.servlet_mappings().map(within) {
        Some(mapped) => {
            req.set_path_decomposition(context.path(), &mapped.servlet_path, mapped.path_info.as_deref());
            context.find_wrapper(&mapped.wrapper)
        }
        None => {
            req.set_path_decomposition(context.path(), within, None);
            None
        }
    };
    let mapping = req.mapping_mut();
    mapping.context = Some(context);
    mapping.wrapper = wrapper;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> ServletMappings {
        let mut m = ServletMappings::new();
        m.add("/exact", "exact").unwrap();
        m.add("/a/*", "a").unwrap();
        m.add("/a/b/*", "ab").unwrap();
        m.add("*.jsp", "jsp").unwrap();
        m.add("/", "default").unwrap();
        m.add("", "root").unwrap();
        m
    }

    #[test]
    fn test_mapping_order() {
        let m = mappings();
        let hit = m.map("/exact").unwrap();
        assert_eq!((hit.wrapper.as_str(), hit.servlet_path.as_str(), hit.path_info), ("exact", "/exact", None));

        let hit = m.map("/a/b/c").unwrap();
        assert_eq!(hit.wrapper, "ab");
        assert_eq!(hit.servlet_path, "/a/b");
        assert_eq!(hit.path_info.as_deref(), Some("/c"));

        let hit = m.map("/a").unwrap();
        assert_eq!((hit.wrapper.as_str(), hit.path_info), ("a", None));

        let hit = m.map("/x/y.jsp").unwrap();
        assert_eq!((hit.wrapper.as_str(), hit.servlet_path.as_str()), ("jsp", "/x/y.jsp"));

        let hit = m.map("/a/y.jsp").unwrap();
        assert_eq!(hit.wrapper, "a");

        let hit = m.map("/").unwrap();
        assert_eq!((hit.wrapper.as_str(), hit.servlet_path.as_str()), ("root", ""));
        assert_eq!(hit.path_info.as_deref(), Some("/"));

        assert_eq!(m.map("/other").unwrap().wrapper, "default");
    }

    #[test]
    fn test_remove_wrapper_mappings() {
        let mut m = mappings();
        m.remove_wrapper("a");
        assert_eq!(m.map("/a/x").unwrap().wrapper, "default");
        assert!(m.find("/a/*").is_none());
        assert_eq!(m.find("/a/b/*"), Some("ab"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(ServletPattern::parse("foo").is_err());
        assert!(ServletPattern::parse("/a/*/b").is_err());
        assert!(ServletPattern::parse("*.").is_err());
        assert_eq!(ServletPattern::parse("/*").unwrap(), ServletPattern::Prefix(String::new()));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/./b/../c").as_deref(), Some("/a/c"));
        assert_eq!(normalize("//a//b/").as_deref(), Some("/a/b/"));
        assert_eq!(normalize("/a/..").as_deref(), Some("/"));
        assert_eq!(normalize("/").as_deref(), Some("/"));
        assert_eq!(normalize("/.."), None);
        assert_eq!(normalize("a/b"), None);
    }
}
