use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use super::{Filter, FilterDef};
use crate::error::DispatchError;

/// A started filter: its declaration plus the live, initialised instance.
///
/// Shared by every chain that matches the filter while the owning context runs.
pub struct ApplicationFilterConfig {
    context: String,
    def: FilterDef,
    filter: Arc<dyn Filter>,
}

impl ApplicationFilterConfig {
    /// Instantiate and initialise the filter declared by `def`.
    pub fn new(context: &str, def: FilterDef) -> Result<Self, DispatchError> {
        let filter = def.instantiate()?;
        let config = Self {
            context: context.to_string(),
            def,
            filter,
        };
        config.filter.init(&config)?;
        debug!(context = %config.context, filter = %config.def.name(), "filter initialised");
        Ok(config)
    }

    #[must_use]
    pub fn filter_name(&self) -> &str {
        self.def.name()
    }

    #[must_use]
    pub fn context_name(&self) -> &str {
        &self.context
    }

    #[must_use]
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.def.init_params().get(name).map(String::as_str)
    }

    #[must_use]
    pub fn init_params(&self) -> &BTreeMap<String, String> {
        self.def.init_params()
    }

    #[must_use]
    pub fn filter(&self) -> &Arc<dyn Filter> {
        &self.filter
    }

    #[must_use]
    pub fn filter_def(&self) -> &FilterDef {
        &self.def
    }

    fn release(&self) {
        self.filter.destroy();
    }
}

impl fmt::Debug for ApplicationFilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationFilterConfig")
            .field("context", &self.context)
            .field("filter", &self.def.name())
            .finish()
    }
}

/// The filter configurations of one running context, keyed by filter name.
///
/// Built when the context starts and torn down when it stops.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    configs: HashMap<String, Arc<ApplicationFilterConfig>>,
}

impl FilterRegistry {
    /// Instantiate every definition. Stops at the first failure after destroying the
    /// filters already initialised.
    pub fn start<'a>(
        context: &str,
        defs: impl IntoIterator<Item = &'a FilterDef>,
    ) -> Result<Self, DispatchError> {
        let mut registry = Self::default();
        for def in defs {
            match ApplicationFilterConfig::new(context, def.clone()) {
                Ok(config) => {
                    registry
                        .configs
                        .insert(def.name().to_string(), Arc::new(config));
                }
                Err(e) => {
                    error!(context = %context, filter = %def.name(), error = %e, "filter failed to start");
                    registry.stop();
                    return Err(e);
                }
            }
        }
        Ok(registry)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ApplicationFilterConfig>> {
        self.configs.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Destroy every filter
    pub fn stop(&self) {
        for (name, config) in &self.configs {
            debug!(filter = %name, "releasing filter");
            config.release();
        }
    }
}
