//! Configuration handling for the zk client.
//!
//! Settings come from the shared YAML config file and environment variables,
//! then command line flags override both in `main`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use zk_session::{AuthData, ClientConfig};

/// Client settings as read from file and environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Connect string, `host:port,host:port[/chroot]`
    pub servers: String,
    /// Requested session timeout in milliseconds
    pub session_timeout_ms: u64,
    /// Chroot overriding the one in the connect string
    pub chroot: Option<String>,
    /// Credentials as `scheme:credential`
    pub auth: Vec<String>,
    /// Skip watch reset after reconnect
    pub disable_auto_watch_reset: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            servers: "127.0.0.1:2181".to_string(),
            session_timeout_ms: 30_000,
            chroot: None,
            auth: Vec::new(),
            disable_auto_watch_reset: false,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    zk: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    auth: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl CliConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();

        info!(
            "Final zk configuration: servers={}, session_timeout={}ms, chroot={}",
            config.servers,
            config.session_timeout_ms,
            config.chroot.as_deref().unwrap_or("none")
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(zk_service) = root_config.services.and_then(|s| s.zk) {
            self.apply_service_config(zk_service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        if let Some(auth) = service_config.auth {
            self.auth = auth;
        }

        if let Some(config_map) = service_config.config {
            for (key, value) in config_map {
                match key.as_str() {
                    "services.zk.servers" => self.servers = value,
                    "services.zk.session_timeout_ms" => match value.parse::<u64>() {
                        Ok(ms) => self.session_timeout_ms = ms,
                        Err(_) => warn!("Ignoring invalid session timeout {:?}", value),
                    },
                    "services.zk.chroot" => self.chroot = Some(value),
                    "services.zk.disable_auto_watch_reset" => {
                        self.disable_auto_watch_reset = value.to_lowercase() == "true";
                    }
                    _ => {}
                }
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(servers) = std::env::var("ZK_SERVERS") {
            info!("Servers overridden by environment: {}", servers);
            self.servers = servers;
        }

        if let Ok(timeout) = std::env::var("ZK_SESSION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.session_timeout_ms = ms;
                info!("Session timeout overridden by environment: {}ms", ms);
            }
        }

        if let Ok(chroot) = std::env::var("ZK_CHROOT") {
            info!("Chroot overridden by environment: {}", chroot);
            self.chroot = Some(chroot);
        }
    }

    /// Build the session engine configuration
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let mut client = ClientConfig::from_connect_string(&self.servers)?;
        client.session_timeout = Duration::from_millis(self.session_timeout_ms);
        client.disable_auto_watch_reset = self.disable_auto_watch_reset;

        match self.chroot.as_deref() {
            None => {}
            Some("") | Some("/") => client.chroot = None,
            Some(chroot) if chroot.starts_with('/') && !chroot.ends_with('/') => {
                client.chroot = Some(chroot.to_string());
            }
            Some(chroot) => return Err(anyhow!("invalid chroot {:?}", chroot)),
        }

        client.auth = self
            .auth
            .iter()
            .map(|entry| parse_auth(entry))
            .collect::<Result<_>>()?;

        Ok(client)
    }
}

/// Parse `scheme:credential`
pub fn parse_auth(entry: &str) -> Result<AuthData> {
    match entry.split_once(':') {
        Some((scheme, credential)) if !scheme.is_empty() => {
            Ok(AuthData::new(scheme, credential.as_bytes().to_vec()))
        }
        _ => Err(anyhow!(
            "auth {:?} must look like scheme:credential",
            entry
        )),
    }
}
