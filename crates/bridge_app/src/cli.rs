//! Command-line arguments.
//!
//! Every option can also come from the environment; flags win over
//! variables, and variables the engine reads itself (`HOSTBRIDGE_TESTS_ROOT`,
//! `HOSTBRIDGE_NETWORK_DEBUG`) are picked up by [`EngineConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use bridge_engine::config::{APP_ID_ENV, DEFAULT_APP_ID, PORT_ENV, ShelfFavorite};
use bridge_engine::{EngineConfig, HeartbeatConfig};
use bridge_net::transport::nats::{DEFAULT_NATS_URL, NATS_URL_ENV};
use bridge_net::transport::tcp::DEFAULT_HOST;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "bridge_app", about = "Pipeline engine for a bridged host application")]
pub struct Args {
    /// Identifier of the host application
    #[arg(long, env = APP_ID_ENV, default_value = DEFAULT_APP_ID)]
    pub app_id: String,

    /// Port the host's bridge socket listens on
    #[arg(short, long, env = PORT_ENV)]
    pub port: Option<u16>,

    /// Address of the host's bridge socket
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Talk to the host over NATS instead of TCP
    #[arg(long)]
    pub nats: bool,

    /// NATS server URL
    #[arg(long, env = NATS_URL_ENV, default_value = DEFAULT_NATS_URL)]
    pub nats_url: String,

    /// Base URL of the production tracking site
    #[arg(long, env = "HOSTBRIDGE_SITE_URL", default_value = "")]
    pub site_url: String,

    /// JSON file mapping root folders to contexts
    #[arg(long, env = "HOSTBRIDGE_ROOTS")]
    pub roots: Option<PathBuf>,

    /// Where settings are persisted
    #[arg(long, env = "HOSTBRIDGE_SETTINGS_ROOT")]
    pub settings_root: Option<PathBuf>,

    /// Folder holding panel icons and document templates
    #[arg(long)]
    pub resources_dir: Option<PathBuf>,

    /// Log file path reported to the panel
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Favourite commands, as `app_instance:name`, in shelf order
    #[arg(long = "favorite")]
    pub favorites: Vec<ShelfFavorite>,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub heartbeat_ms: u64,

    /// Consecutive heartbeat failures before quitting
    #[arg(long, default_value_t = 2)]
    pub tolerance: u32,

    /// Seconds to wait for any single host call
    #[arg(long, default_value_t = 30)]
    pub call_timeout: u64,

    /// Do not follow the host's active document
    #[arg(long)]
    pub no_auto_switch: bool,

    /// Do not export the context to the host environment
    #[arg(long)]
    pub no_export_context: bool,
}

impl Args {
    /// Layer these arguments over `base`.
    pub fn apply(&self, base: EngineConfig) -> EngineConfig {
        let mut config = EngineConfig {
            app_id: self.app_id.clone(),
            ..base
        }
        .with_site_url(self.site_url.as_str())
        .with_heartbeat(
            HeartbeatConfig::default()
                .with_interval(Duration::from_millis(self.heartbeat_ms))
                .with_tolerance(self.tolerance),
        )
        .with_call_timeout(Duration::from_secs(self.call_timeout))
        .with_automatic_context_switch(!self.no_auto_switch)
        .with_export_context(!self.no_export_context)
        .with_shelf_favorites(self.favorites.clone());

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(root) = &self.settings_root {
            config = config.with_settings_root(root);
        }
        if let Some(dir) = &self.resources_dir {
            config = config.with_resources_dir(dir);
        }
        if let Some(path) = &self.log_file {
            config = config.with_log_file(path);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "bridge_app",
            "--app-id",
            "photoshop",
            "--port",
            "9000",
            "--site-url",
            "https://studio.example/",
            "--favorite",
            "tk-multi-publish:Publish...",
            "--tolerance",
            "0",
            "--no-auto-switch",
        ])
        .unwrap();
        let config = args.apply(EngineConfig::default().with_tests_root("/tests"));

        assert_eq!(config.app_id, "photoshop");
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.site_url, "https://studio.example");
        assert_eq!(config.shelf_favorites[0].name, "Publish...");
        assert_eq!(config.heartbeat.tolerance, 1);
        assert!(!config.automatic_context_switch);
        assert!(config.export_context);
        assert_eq!(config.tests_root, Some(PathBuf::from("/tests")));
    }

    #[test]
    fn test_bad_favorite_is_rejected() {
        assert!(Args::try_parse_from(["bridge_app", "--favorite", "no-colon"]).is_err());
    }
}
