//! Document path → context cache.
//!
//! Resolving a context from a path can be slow, so every resolved document
//! is remembered for the lifetime of the engine and persisted in the
//! project's settings so a restarted session can reuse it. There is no
//! eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::SettingsError;
use crate::settings::{self, SettingsScope, SettingsStore};

pub struct ContextCache {
    key: String,
    entries: HashMap<String, Context>,
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCache")
            .field("key", &self.key)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ContextCache {
    #[must_use]
    pub fn new(key: impl Into<String>, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            key: key.into(),
            entries: HashMap::new(),
            store,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Context> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remember `context` for `path`. The cache is persisted in `scope` only
    /// when `path` was not cached before. Returns whether it was new.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if persisting fails. The in-memory entry
    /// is kept either way.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        context: Context,
        scope: SettingsScope,
    ) -> Result<bool, SettingsError> {
        let path = path.into();
        let is_new = self.entries.insert(path.clone(), context).is_none();
        if is_new {
            debug!(path = %path, "caching context for document");
            self.persist(scope)?;
        }
        Ok(is_new)
    }

    /// Forget everything, in memory and in `scope`.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if persisting fails.
    pub fn clear(&mut self, scope: SettingsScope) -> Result<(), SettingsError> {
        self.entries.clear();
        self.persist(scope)
    }

    /// Load entries persisted in `scope`, replacing the in-memory state.
    /// Returns the number of restored entries.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the stored value cannot be read.
    pub fn restore(&mut self, scope: SettingsScope) -> Result<usize, SettingsError> {
        let stored: Option<BTreeMap<String, Context>> =
            settings::load_value(self.store.as_ref(), scope, &self.key)?;
        self.entries = stored.unwrap_or_default().into_iter().collect();
        debug!(entries = self.entries.len(), "context cache restored");
        Ok(self.entries.len())
    }

    fn persist(&self, scope: SettingsScope) -> Result<(), SettingsError> {
        let ordered: BTreeMap<&String, &Context> = self.entries.iter().collect();
        settings::store_value(self.store.as_ref(), scope, &self.key, &ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntityRef;
    use crate::settings::MemorySettingsStore;

    const SCOPE: SettingsScope = SettingsScope::Project(70);

    fn context(id: u64) -> Context {
        Context::for_project(EntityRef::new("Project", 70)).with_entity(EntityRef::new("Shot", id))
    }

    #[test]
    fn test_insert_persists_new_paths_only() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut cache = ContextCache::new("ae_context_cache", store.clone());

        assert!(cache.insert("/a.aep", context(1), SCOPE).unwrap());
        assert!(!cache.insert("/a.aep", context(2), SCOPE).unwrap());
        assert_eq!(cache.get("/a.aep"), Some(&context(2)));

        // The persisted copy still has the first value.
        let mut reloaded = ContextCache::new("ae_context_cache", store);
        assert_eq!(reloaded.restore(SCOPE).unwrap(), 1);
        assert_eq!(reloaded.get("/a.aep"), Some(&context(1)));
    }

    #[test]
    fn test_clear_wipes_persisted_state() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut cache = ContextCache::new("k", store.clone());
        cache.insert("/a.aep", context(1), SCOPE).unwrap();
        cache.insert("/b.aep", context(2), SCOPE).unwrap();
        cache.clear(SCOPE).unwrap();
        assert!(cache.is_empty());

        let mut reloaded = ContextCache::new("k", store);
        assert_eq!(reloaded.restore(SCOPE).unwrap(), 0);
    }

    #[test]
    fn test_restore_from_empty_store() {
        let mut cache = ContextCache::new("k", Arc::new(MemorySettingsStore::new()));
        assert_eq!(cache.restore(SettingsScope::Global).unwrap(), 0);
    }
}
