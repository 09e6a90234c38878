use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use super::{ChildMap, Container, ContainerCore, ContainerKind, Context, Engine};
use crate::error::ContainerError;
use crate::valves::HostValve;

/// Virtual host: a set of contexts reachable under one or more host names.
pub struct Host {
    core: ContainerCore,
    parent: RwLock<Weak<Engine>>,
    contexts: ChildMap<Context>,
    aliases: RwLock<Vec<String>>,
    this: Weak<Host>,
}

impl Host {
    /// Host names are case-insensitive and stored lower-cased.
    pub fn new(name: &str) -> Arc<Host> {
        let name = name.to_ascii_lowercase();
        Arc::new_cyclic(|weak: &Weak<Host>| {
            let this = Weak::clone(weak);
            let container: Weak<dyn Container> = this;
            Host {
                core: ContainerCore::new(&name, ContainerKind::Host, Arc::new(HostValve), container),
                parent: RwLock::new(Weak::new()),
                contexts: ChildMap::default(),
                aliases: RwLock::new(Vec::new()),
                this: Weak::clone(weak),
            }
        })
    }

    #[must_use]
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn attach(&self, parent: &Arc<Engine>) -> Result<(), ContainerError> {
        let mut slot = self.parent.write();
        if slot.upgrade().is_some() {
            return Err(ContainerError::AlreadyAttached {
                child: self.name().to_string(),
            });
        }
        *slot = Arc::downgrade(parent);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        *self.parent.write() = Weak::new();
    }

    pub fn add_alias(&self, alias: &str) {
        let alias = alias.to_ascii_lowercase();
        let mut aliases = self.aliases.write();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    pub fn remove_alias(&self, alias: &str) {
        let alias = alias.to_ascii_lowercase();
        self.aliases.write().retain(|a| *a != alias);
    }

    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.aliases.read().clone()
    }

    #[must_use]
    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases
            .read()
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn add_context(&self, context: Arc<Context>) -> Result<(), ContainerError> {
        let Some(this) = self.this.upgrade() else {
            return Err(ContainerError::lifecycle(self.name(), "host is being dropped"));
        };
        self.contexts.add(self, context, |c| c.attach(&this))
    }

    /// Remove the context with path `path` (`""` or `"/"` for the root context)
    pub fn remove_context(&self, path: &str) -> Option<Arc<Context>> {
        self.contexts
            .remove(self, path.trim_end_matches('/'), Context::detach)
    }

    #[must_use]
    pub fn find_context(&self, path: &str) -> Option<Arc<Context>> {
        self.contexts.get(path.trim_end_matches('/'))
    }

    #[must_use]
    pub fn contexts(&self) -> Vec<Arc<Context>> {
        self.contexts.list()
    }
}

impl Container for Host {
    fn core(&self) -> &ContainerCore {
        &self.core
    }

    fn parent_container(&self) -> Option<Arc<dyn Container>> {
        self.engine().map(|e| e as Arc<dyn Container>)
    }

    fn child_containers(&self) -> Vec<Arc<dyn Container>> {
        self.contexts.as_dyn()
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("aliases", &self.aliases())
            .field("contexts", &self.contexts)
            .finish()
    }
}
