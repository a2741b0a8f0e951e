//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from the ADMIN_TOKEN env var or `token_file`,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub router: RouterSection,
    pub source: SourceConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream generation API settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Retry policy settings
#[derive(Debug, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_passes")]
    pub passes: usize,
    #[serde(default = "default_backoff_ms")]
    pub transient_backoff_ms: u64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            passes: default_passes(),
            transient_backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Http,
}

/// Where credentials are loaded from
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    /// Absent means reload only at startup and via the admin endpoint
    #[serde(default)]
    pub reload_interval_secs: Option<u64>,
}

impl SourceConfig {
    pub fn reload_interval(&self) -> Option<Duration> {
        self.reload_interval_secs.map(Duration::from_secs)
    }
}

/// Admin endpoint settings
#[derive(Debug, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the admin token (alternative to ADMIN_TOKEN env var)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    backend::gemini::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    backend::gemini::DEFAULT_MODEL.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_passes() -> usize {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Admin token resolution order:
    /// 1. ADMIN_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.admin.token = Some(Secret::new(token));
            }
        } else if let Some(ref token_file) = config.admin.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.admin.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !is_http_url(&self.backend.base_url) {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }
        if self.backend.model.trim().is_empty() {
            return Err(common::Error::Config("model must not be empty".into()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.router.passes == 0 {
            return Err(common::Error::Config(
                "passes must be greater than 0".into(),
            ));
        }

        match self.source.kind {
            SourceKind::File if self.source.path.is_none() => {
                return Err(common::Error::Config(
                    "source kind \"file\" requires path".into(),
                ));
            }
            SourceKind::Http => match &self.source.url {
                None => {
                    return Err(common::Error::Config(
                        "source kind \"http\" requires url".into(),
                    ));
                }
                Some(url) if !is_http_url(url) => {
                    return Err(common::Error::Config(format!(
                        "source url must start with http:// or https://, got: {url}"
                    )));
                }
                Some(_) => {}
            },
            SourceKind::File => {}
        }
        if self.source.reload_interval_secs == Some(0) {
            return Err(common::Error::Config(
                "reload_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("key-router.toml")
    }
}
