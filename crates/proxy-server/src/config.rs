use crate::error::ConfigError;
use crate::forward::Origin;
use crate::transport::{DEFAULT_TTL, MAX_BODY_BYTES, MAX_REDIRECTS};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

/// Values given on the command line. Each one that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub origin: Option<String>,
    pub admin_addr: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(origin) = overrides.origin {
            self.upstream.url = Some(origin);
        }
        if let Some(addr) = overrides.admin_addr {
            self.server.admin_addr = addr;
        }
    }

    /// The origin every request is forwarded to. Required to run the proxy.
    pub fn origin(&self) -> Result<Origin, ConfigError> {
        match self.upstream.url.as_deref().map(str::trim) {
            None | Some("") => Err(ConfigError::MissingOrigin),
            Some(url) => Origin::parse(url),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&format!("{}:{}", self.server.host, self.server.port))
    }

    pub fn admin_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.server.admin_addr)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_seconds)
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|source| ConfigError::Address {
        addr: addr.to_string(),
        source,
    })
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_addr: default_admin_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_admin_addr() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_max_body_bytes() -> usize {
    MAX_BODY_BYTES
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_ttl() -> u64 {
    DEFAULT_TTL.as_secs()
}
fn default_sweep_interval() -> u64 {
    600
}
fn default_max_redirects() -> usize {
    MAX_REDIRECTS
}
