//! # Runtime Configuration Module
//!
//! Runtime knobs for the container tree. Values come from three layers, each overriding
//! the previous one:
//!
//! 1. Built-in defaults ([`RuntimeConfig::default`])
//! 2. An optional YAML file ([`RuntimeConfig::load`])
//! 3. Environment variables ([`RuntimeConfig::apply_env`])
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `BRRTV_BACKGROUND_DELAY_SECS` | Engine background processor interval, `<= 0` disables | `10` |
//! | `BRRTV_SECURITY_ISOLATION` | Never pool filter chains on requests | `false` |
//! | `BRRTV_RESPONSE_BUFFER_SIZE` | Bytes buffered before a response commits (decimal or `0x` hex) | `0x2000` |
//! | `BRRTV_MAX_INSTANCES` | Pool bound for single-instance handlers | `20` |
//! | `BRRTV_DEFAULT_HOST` | Host used when no host name matches | `localhost` |
//!
//! ## Example
//!
//! ```yaml
//! engine_name: catalina
//! default_host: example.org
//! background_delay_secs: 5
//! security_isolation: true
//! ```

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;

const DEFAULT_BUFFER_SIZE: usize = 0x2000;

/// Runtime configuration shared by every container of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of the top-level container
    pub engine_name: String,
    /// Host selected when the request host name matches nothing
    pub default_host: String,
    /// Interval of the engine background processor in seconds (`<= 0` disables it)
    pub background_delay_secs: i64,
    /// Heightened isolation: filter chains are never pooled on request objects
    pub security_isolation: bool,
    /// Response bytes buffered before the response is committed
    pub response_buffer_size: usize,
    /// Maximum pooled instances for single-instance-at-a-time handlers
    pub max_instances: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine_name: "engine".to_string(),
            default_host: "localhost".to_string(),
            background_delay_secs: 10,
            security_isolation: false,
            response_buffer_size: DEFAULT_BUFFER_SIZE,
            max_instances: 20,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a YAML document; missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid runtime configuration")
    }

    /// Load a YAML file and apply environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::from_yaml_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `BRRTV_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(delay) = env::var("BRRTV_BACKGROUND_DELAY_SECS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.background_delay_secs = delay;
        }
        if let Some(isolated) = env::var("BRRTV_SECURITY_ISOLATION")
            .ok()
            .and_then(|s| parse_bool(&s))
        {
            self.security_isolation = isolated;
        }
        if let Some(size) = env::var("BRRTV_RESPONSE_BUFFER_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
        {
            self.response_buffer_size = size;
        }
        if let Some(max) = env::var("BRRTV_MAX_INSTANCES")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.max_instances = max;
        }
        if let Ok(host) = env::var("BRRTV_DEFAULT_HOST") {
            if !host.trim().is_empty() {
                self.default_host = host.trim().to_string();
            }
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal size
pub(crate) fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("16384"), Some(16384));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_yaml_partial_keeps_defaults() {
        let config = RuntimeConfig::from_yaml_str("default_host: example.org\n").unwrap();
        assert_eq!(config.default_host, "example.org");
        assert_eq!(config.max_instances, 20);
        assert_eq!(config.background_delay_secs, 10);
    }
}
