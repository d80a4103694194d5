//! Engine configuration.
//!
//! [`EngineConfig::from_env`] reads the variables the host launcher exports;
//! the `with_*` builders layer explicit overrides (CLI arguments, tests) on
//! top.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::EngineError;
use crate::heartbeat::HeartbeatConfig;

/// Port of the host-side bridge server.
pub const PORT_ENV: &str = "HOSTBRIDGE_PORT";
/// Identifier of the host application instance (e.g. `aftereffects`).
pub const APP_ID_ENV: &str = "HOSTBRIDGE_APPID";
/// Presence enables network debug logging.
pub const NETWORK_DEBUG_ENV: &str = "HOSTBRIDGE_NETWORK_DEBUG";
/// Directory containing the host integration test runner.
pub const TESTS_ROOT_ENV: &str = "HOSTBRIDGE_TESTS_ROOT";
/// Serialised context handed over across restarts.
pub const CONTEXT_ENV: &str = "HOSTBRIDGE_CONTEXT";

/// Default deadline for a single remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Application id used when none is configured.
pub const DEFAULT_APP_ID: &str = "host";

/// A favourite command shown on the panel shelf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfFavorite {
    /// The app instance that registered the command.
    pub app_instance: String,
    /// The command's display name.
    pub name: String,
}

impl FromStr for ShelfFavorite {
    type Err = EngineError;

    /// Parses `app_instance:name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app_instance, name) = s
            .split_once(':')
            .ok_or_else(|| EngineError::Config(format!("shelf favorite {s:?} is not app:name")))?;
        let (app_instance, name) = (app_instance.trim(), name.trim());
        if app_instance.is_empty() || name.is_empty() {
            return Err(EngineError::Config(format!(
                "shelf favorite {s:?} has an empty part"
            )));
        }
        Ok(Self {
            app_instance: app_instance.to_string(),
            name: name.to_string(),
        })
    }
}

/// Everything the engine needs to start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub app_id: String,
    pub port: Option<u16>,
    pub network_debug: bool,
    pub tests_root: Option<PathBuf>,
    pub heartbeat: HeartbeatConfig,
    pub call_timeout: Duration,
    /// Follow the host's active document automatically.
    pub automatic_context_switch: bool,
    pub shelf_favorites: Vec<ShelfFavorite>,
    /// Base URL of the production tracking site.
    pub site_url: String,
    /// Root directory of the settings store.
    pub settings_root: Option<PathBuf>,
    /// Export the serialised context into the host environment on change.
    pub export_context: bool,
    /// Log file path reported to the panel.
    pub log_file: Option<PathBuf>,
    /// Directory holding templates such as the empty project file.
    pub resources_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID)
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            port: None,
            network_debug: false,
            tests_root: None,
            heartbeat: HeartbeatConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            automatic_context_switch: true,
            shelf_favorites: Vec::new(),
            site_url: String::new(),
            settings_root: None,
            export_context: true,
            log_file: None,
            resources_dir: None,
        }
    }

    /// Read the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a variable is present but invalid.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let app_id = lookup(APP_ID_ENV)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string());
        let mut config = Self::new(app_id);

        if let Some(port) = lookup(PORT_ENV) {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| EngineError::Config(format!("{PORT_ENV}={port:?}: {e}")))?;
            config.port = Some(port);
        }
        config.network_debug = lookup(NETWORK_DEBUG_ENV).is_some();
        config.tests_root = lookup(TESTS_ROOT_ENV)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_network_debug(mut self, enabled: bool) -> Self {
        self.network_debug = enabled;
        self
    }

    #[must_use]
    pub fn with_tests_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.tests_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_automatic_context_switch(mut self, enabled: bool) -> Self {
        self.automatic_context_switch = enabled;
        self
    }

    #[must_use]
    pub fn with_shelf_favorites(mut self, favorites: Vec<ShelfFavorite>) -> Self {
        self.shelf_favorites = favorites;
        self
    }

    #[must_use]
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_settings_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.settings_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn with_export_context(mut self, enabled: bool) -> Self {
        self.export_context = enabled;
        self
    }

    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_resources_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources_dir = Some(dir.into());
        self
    }

    /// Settings key the context cache is persisted under.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}_context_cache", self.app_id.to_lowercase())
    }
}
