//! Thread-safe container manager.
//!
//! Podman-style separation of ContainerConfig (immutable) and ContainerState
//! (mutable), with a database-first discipline: every state change persists
//! before the in-memory cache is updated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bakelite_shared::errors::{BakeliteError, BakeliteResult};

use crate::container::config::ContainerConfig;
use crate::db::ContainerStore;
use crate::runtime::types::{ContainerId, ContainerState};

#[derive(Clone)]
struct CacheEntry {
    config: ContainerConfig,
    state: ContainerState,
}

/// Thread-safe manager for tracking containers.
///
/// Cloneable via `Arc`; all clones share the cache and store.
#[derive(Clone)]
pub struct ContainerManager {
    inner: Arc<RwLock<ContainerManagerInner>>,
}

struct ContainerManagerInner {
    containers: HashMap<ContainerId, CacheEntry>,
    store: ContainerStore,
}

impl std::fmt::Debug for ContainerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerManager").finish()
    }
}

impl ContainerManager {
    pub fn new(store: ContainerStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContainerManagerInner {
                containers: HashMap::new(),
                store,
            })),
        }
    }

    fn write(&self) -> BakeliteResult<std::sync::RwLockWriteGuard<'_, ContainerManagerInner>> {
        self.inner
            .write()
            .map_err(|e| BakeliteError::Internal(format!("manager lock poisoned: {e}")))
    }

    fn read(&self) -> BakeliteResult<std::sync::RwLockReadGuard<'_, ContainerManagerInner>> {
        self.inner
            .read()
            .map_err(|e| BakeliteError::Internal(format!("manager lock poisoned: {e}")))
    }

    /// Register a new container. Database-first: saves before caching.
    pub fn register(&self, config: ContainerConfig, state: ContainerState) -> BakeliteResult<()> {
        let mut inner = self.write()?;

        if inner.containers.contains_key(&config.id) {
            return Err(BakeliteError::Internal(format!(
                "container {} already registered",
                config.id
            )));
        }

        inner.store.save(&config, &state)?;

        tracing::debug!(
            container = %config.id.short(),
            status = %state.status,
            "Registering container"
        );

        let id = config.id.clone();
        inner.containers.insert(id, CacheEntry { config, state });
        Ok(())
    }

    /// Register a container already persisted in the database (startup
    /// recovery path).
    pub fn register_recovered(
        &self,
        config: ContainerConfig,
        state: ContainerState,
    ) -> BakeliteResult<()> {
        let mut inner = self.write()?;
        let id = config.id.clone();
        inner.containers.insert(id, CacheEntry { config, state });
        Ok(())
    }

    /// Apply a mutation to a container's state. Database-first.
    pub fn update_state(
        &self,
        id: &ContainerId,
        mutate: impl FnOnce(&mut ContainerState),
    ) -> BakeliteResult<ContainerState> {
        let mut inner = self.write()?;

        let entry = inner
            .containers
            .get(id)
            .ok_or_else(|| BakeliteError::NotFound(id.to_string()))?;

        let mut state = entry.state.clone();
        mutate(&mut state);

        inner.store.update_state(id, &state)?;
        if let Some(entry) = inner.containers.get_mut(id) {
            entry.state = state.clone();
        }
        Ok(state)
    }

    pub fn get(
        &self,
        id: &ContainerId,
    ) -> BakeliteResult<Option<(ContainerConfig, ContainerState)>> {
        let inner = self.read()?;
        Ok(inner
            .containers
            .get(id)
            .map(|entry| (entry.config.clone(), entry.state.clone())))
    }

    /// Resolve a user-supplied identifier (id, id prefix, or name).
    pub fn resolve(&self, needle: &str) -> BakeliteResult<Option<ContainerId>> {
        let inner = self.read()?;
        inner.store.resolve(needle)
    }

    pub fn list(&self) -> BakeliteResult<Vec<(ContainerConfig, ContainerState)>> {
        let inner = self.read()?;
        let mut all: Vec<_> = inner
            .containers
            .values()
            .map(|entry| (entry.config.clone(), entry.state.clone()))
            .collect();
        all.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));
        Ok(all)
    }

    /// Remove a container. Database-first: the row goes before the cache
    /// entry.
    pub fn remove(&self, id: &ContainerId) -> BakeliteResult<()> {
        let mut inner = self.write()?;
        inner.store.remove(id)?;
        inner.containers.remove(id);
        Ok(())
    }

    /// Load all persisted containers (startup recovery).
    pub fn load_all_persisted(&self) -> BakeliteResult<Vec<(ContainerConfig, ContainerState)>> {
        let inner = self.read()?;
        inner.store.list()
    }
}
