//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: FABRIC_AUDIT_, nested keys split on `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/fabric-audit/{service_name}/config.toml
//! 4. System directory: /etc/fabric-audit/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::gelf::DEFAULT_HOST;

/// Facility used when a caller does not name one
pub const DEFAULT_FACILITY: &str = "fabric-instance";

const ENV_PREFIX: &str = "FABRIC_AUDIT_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Audit pipeline configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Audit pipeline configuration
///
/// Loaded from the `[audit]` section of config.toml or environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record audit entries at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// GELF collector, `host` or `host:port` (default: localhost:12201)
    #[serde(default = "default_host")]
    pub host: String,

    /// Facility tag for request records
    #[serde(default = "default_facility")]
    pub facility: String,

    /// Identifier of this instance, used by the HTTP middleware
    #[serde(default)]
    pub instance_id: Option<String>,

    /// Static instance metadata (cluster-id, app-server-id, ...)
    ///
    /// Applied through `set_metadata` when the dispatcher is built.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Value of the GELF `host` field when the record carries none
    #[serde(default)]
    pub source_host: Option<String>,

    /// Maximum records waiting to be sent
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum concurrent sends (1 to 1024)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on a single send, in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Largest datagram written to the collector, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Routes the HTTP middleware does not audit (default: ["/health", "/ready", "/metrics"])
    #[serde(default = "default_excluded_routes")]
    pub excluded_routes: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            facility: default_facility(),
            instance_id: None,
            metadata: BTreeMap::new(),
            source_host: None,
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            send_timeout_ms: default_send_timeout_ms(),
            chunk_size: default_chunk_size(),
            excluded_routes: default_excluded_routes(),
        }
    }
}

impl AuditConfig {
    /// Get the send timeout as a Duration
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_facility() -> String {
    DEFAULT_FACILITY.to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    4
}

fn default_send_timeout_ms() -> u64 {
    500
}

fn default_chunk_size() -> usize {
    1420 // WAN-safe datagram
}

fn default_excluded_routes() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/fabric-audit/{service_name}/config.toml
    /// 3. System directory: /etc/fabric-audit/{service_name}/config.toml
    ///
    /// Environment variables (FABRIC_AUDIT_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "fabric-audit".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::named(service_name)));

        // Lowest priority first so later merges win
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths for a service, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("fabric-audit");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/fabric-audit")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    fn named(service_name: &str) -> Self {
        let mut config = Self::default();
        config.service.name = service_name.to_string();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "fabric-audit".to_string(),
                log_level: default_log_level(),
            },
            audit: AuditConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.log_level, "info");
        assert!(config.audit.enabled);
        assert_eq!(config.audit.host, "localhost:12201");
        assert_eq!(config.audit.facility, "fabric-instance");
        assert_eq!(config.audit.queue_capacity, 1024);
        assert_eq!(config.audit.workers, 4);
        assert_eq!(config.audit.send_timeout(), Duration::from_millis(500));
        assert!(config.audit.metadata.is_empty());
        assert_eq!(
            config.audit.excluded_routes,
            vec!["/health", "/ready", "/metrics"]
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "dfe-console"

[audit]
host = "graylog.internal:12202"
facility = "console"
instance_id = "inst-7"
workers = 2

[audit.metadata]
cluster-id = "cluster-east"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.service.name, "dfe-console");
        assert_eq!(config.audit.host, "graylog.internal:12202");
        assert_eq!(config.audit.facility, "console");
        assert_eq!(config.audit.instance_id.as_deref(), Some("inst-7"));
        assert_eq!(config.audit.workers, 2);
        assert_eq!(config.audit.queue_capacity, 1024);
        assert_eq!(
            config.audit.metadata.get("cluster-id").map(String::as_str),
            Some("cluster-east")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "audit.toml",
                r#"
[service]
name = "svc"

[audit]
host = "from-file:12201"
"#,
            )?;
            jail.set_env("FABRIC_AUDIT_AUDIT__HOST", "from-env:5555");

            let config = Config::load_from("audit.toml").expect("config loads");
            assert_eq!(config.audit.host, "from-env:5555");
            Ok(())
        });
    }
}
