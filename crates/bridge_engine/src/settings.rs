//! User settings persistence.
//!
//! Values are MessagePack-encoded and stored per scope and key. The file
//! store lays them out as `<root>/<scope>/<key>.msgpack`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SettingsError;

/// Where a setting lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsScope {
    Global,
    Project(u64),
}

impl SettingsScope {
    fn dir_name(self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Project(id) => format!("project_{id}"),
        }
    }
}

/// Raw byte storage for settings.
pub trait SettingsStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the backing storage fails.
    fn load(&self, scope: SettingsScope, key: &str) -> Result<Option<Vec<u8>>, SettingsError>;

    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the backing storage fails.
    fn store(&self, scope: SettingsScope, key: &str, bytes: &[u8]) -> Result<(), SettingsError>;
}

/// Read and decode a setting.
///
/// # Errors
///
/// Returns a [`SettingsError`] if reading or decoding fails.
pub fn load_value<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    scope: SettingsScope,
    key: &str,
) -> Result<Option<T>, SettingsError> {
    match store.load(scope, key)? {
        Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write a setting.
///
/// # Errors
///
/// Returns a [`SettingsError`] if encoding or writing fails.
pub fn store_value<T: Serialize>(
    store: &dyn SettingsStore,
    scope: SettingsScope,
    key: &str,
    value: &T,
) -> Result<(), SettingsError> {
    let bytes = rmp_serde::to_vec_named(value)?;
    store.store(scope, key, &bytes)
}

// ── File store ──────────────────────────────────────────────────────────────

/// Settings kept in files under a root directory.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    root: PathBuf,
}

impl FileSettingsStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, scope: SettingsScope, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(scope.dir_name()).join(format!("{file}.msgpack"))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self, scope: SettingsScope, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        let path = self.path_for(scope, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, scope: SettingsScope, key: &str, bytes: &[u8]) -> Result<(), SettingsError> {
        let path = self.path_for(scope, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Atomic replace.
        let tmp = path.with_extension("msgpack.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), len = bytes.len(), "setting stored");
        Ok(())
    }
}

// ── Memory store ────────────────────────────────────────────────────────────

/// Settings kept in memory, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: DashMap<(SettingsScope, String), Vec<u8>>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, scope: SettingsScope, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        Ok(self
            .values
            .get(&(scope, key.to_string()))
            .map(|v| v.value().clone()))
    }

    fn store(&self, scope: SettingsScope, key: &str, bytes: &[u8]) -> Result<(), SettingsError> {
        self.values.insert((scope, key.to_string()), bytes.to_vec());
        Ok(())
    }
}
