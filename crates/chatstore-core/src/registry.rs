//! Explicit store registry
//!
//! A [`StoreRegistry`] is built once at startup and handed to whatever needs
//! a store. It creates each store type on first use and returns the same
//! instance afterwards, so there is exactly one shared store per type without
//! any process-global state.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A shareable store addressable by a fixed identifier.
///
/// `Clone` must produce a handle to the same instance.
pub trait Store: Clone + Send + Sync + 'static {
    /// Registration identifier, unique within an application
    const ID: &'static str;

    fn create() -> Self;
}

struct Entry {
    id: &'static str,
    store: Box<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<Mutex<HashMap<TypeId, Entry>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared instance of `S`, creating it on the first call.
    pub fn use_store<S: Store>(&self) -> S {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = stores
            .get(&TypeId::of::<S>())
            .and_then(|entry| entry.store.downcast_ref::<S>())
        {
            return existing.clone();
        }

        debug_assert!(
            !stores.values().any(|entry| entry.id == S::ID),
            "store id {:?} registered by two different types",
            S::ID
        );

        let store = S::create();
        stores.insert(
            TypeId::of::<S>(),
            Entry {
                id: S::ID,
                store: Box::new(store.clone()),
            },
        );
        tracing::debug!(id = S::ID, "store created");
        store
    }

    /// Whether a store with this identifier has been created
    pub fn contains(&self, id: &str) -> bool {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|entry| entry.id == id)
    }

    /// Identifiers of all created stores, sorted
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry").field("ids", &self.ids()).finish()
    }
}
