//! Collaborators shared down the container tree.
//!
//! Class loading, session management, authentication and resource storage live
//! outside this crate; the containers only carry them. A container answers with its
//! own collaborator when one is set and otherwise asks its parent, up to the root.

use parking_lot::RwLock;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::runtime_config::RuntimeConfig;

/// Code-loading scope of an application
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    fn background_process(&self) {}
}

/// Session manager
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    fn background_process(&self) {}
}

/// Authentication realm
pub trait Realm: Send + Sync {
    fn name(&self) -> &str;

    fn background_process(&self) {}
}

/// Static resource store
pub trait Resources: Send + Sync {
    fn name(&self) -> &str;

    fn exists(&self, _path: &str) -> bool {
        false
    }

    fn background_process(&self) {}
}

/// Locally configured collaborators of one container.
#[derive(Default)]
pub struct Collaborators {
    loader: RwLock<Option<Arc<dyn Loader>>>,
    manager: RwLock<Option<Arc<dyn Manager>>>,
    realm: RwLock<Option<Arc<dyn Realm>>>,
    resources: RwLock<Option<Arc<dyn Resources>>>,
    config: RwLock<Option<Arc<RuntimeConfig>>>,
}

impl Collaborators {
    #[must_use]
    pub fn loader(&self) -> Option<Arc<dyn Loader>> {
        self.loader.read().clone()
    }

    pub fn set_loader(&self, loader: Option<Arc<dyn Loader>>) {
        *self.loader.write() = loader;
    }

    #[must_use]
    pub fn manager(&self) -> Option<Arc<dyn Manager>> {
        self.manager.read().clone()
    }

    pub fn set_manager(&self, manager: Option<Arc<dyn Manager>>) {
        *self.manager.write() = manager;
    }

    #[must_use]
    pub fn realm(&self) -> Option<Arc<dyn Realm>> {
        self.realm.read().clone()
    }

    pub fn set_realm(&self, realm: Option<Arc<dyn Realm>>) {
        *self.realm.write() = realm;
    }

    #[must_use]
    pub fn resources(&self) -> Option<Arc<dyn Resources>> {
        self.resources.read().clone()
    }

    pub fn set_resources(&self, resources: Option<Arc<dyn Resources>>) {
        *self.resources.write() = resources;
    }

    #[must_use]
    pub fn runtime_config(&self) -> Option<Arc<RuntimeConfig>> {
        self.config.read().clone()
    }

    pub fn set_runtime_config(&self, config: Option<Arc<RuntimeConfig>>) {
        *self.config.write() = config;
    }

    /// Run the maintenance hook of each locally set collaborator
    pub(crate) fn background_process(&self) {
        if let Some(loader) = self.loader() {
            loader.background_process();
        }
        if let Some(manager) = self.manager() {
            manager.background_process();
        }
        if let Some(realm) = self.realm() {
            realm.background_process();
        }
        if let Some(resources) = self.resources() {
            resources.background_process();
        }
    }
}

thread_local! {
    static BOUND_LOADER: RefCell<Option<Arc<dyn Loader>>> = const { RefCell::new(None) };
}

/// Guard returned by [`bind_loader`]. Restores the previous binding on drop.
#[must_use = "the loader is unbound when the guard is dropped"]
pub struct LoaderBinding {
    previous: Option<Arc<dyn Loader>>,
    _not_send: PhantomData<*const ()>,
}

/// Bind `loader` to the current thread until the returned guard drops.
pub fn bind_loader(loader: Option<Arc<dyn Loader>>) -> LoaderBinding {
    let previous = BOUND_LOADER.with(|b| b.replace(loader));
    LoaderBinding {
        previous,
        _not_send: PhantomData,
    }
}

/// Loader bound to the current thread, if any
#[must_use]
pub fn current_loader() -> Option<Arc<dyn Loader>> {
    BOUND_LOADER.with(|b| b.borrow().clone())
}

impl Drop for LoaderBinding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        BOUND_LOADER.with(|b| {
            *b.borrow_mut() = previous;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Loader for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_binding_nests_and_restores() {
        assert!(current_loader().is_none());
        {
            let _outer = bind_loader(Some(Arc::new(Named("outer"))));
            {
                let _inner = bind_loader(Some(Arc::new(Named("inner"))));
                assert_eq!(current_loader().map(|l| l.name().to_string()).as_deref(), Some("inner"));
            }
            assert_eq!(current_loader().map(|l| l.name().to_string()).as_deref(), Some("outer"));
        }
        assert!(current_loader().is_none());
    }
}
