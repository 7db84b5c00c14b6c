//! Configuration module

use crate::acl::Rule;
use crate::{Error, Result};
use http::Uri;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address
    pub listen: String,

    /// TLS for the listener (enables HTTP/2 via ALPN)
    pub tls: Option<TlsConfig>,

    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Outbound dial timeout in seconds
    #[serde(rename = "dial-timeout")]
    pub dial_timeout: u64,

    /// Proxy users
    pub users: Vec<UserConfig>,

    /// Access control rules, first match wins
    pub acl: Vec<String>,

    /// Hosts that get the panel instead of silent failure
    pub whitelist: Vec<String>,

    /// Fallback routing
    pub fallback: FallbackConfig,
}

impl Config {
    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.fallback.host = self
            .fallback
            .host
            .take()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty());
        self.fallback.target = self
            .fallback
            .target
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|e| Error::config(format!("Invalid listen address {}: {}", self.listen, e)))?;

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                return Err(Error::config("Username cannot be empty"));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(Error::config(format!("Duplicate user: {}", user.username)));
            }
        }

        for rule in &self.acl {
            Rule::parse(rule)?;
        }

        if let Some(ref target) = self.fallback.target {
            self.fallback_target_uri(target)?;
        }

        Ok(())
    }

    /// Parsed fallback target, if one is configured
    pub fn fallback_target(&self) -> Result<Option<Uri>> {
        self.fallback
            .target
            .as_deref()
            .map(|t| self.fallback_target_uri(t))
            .transpose()
    }

    fn fallback_target_uri(&self, target: &str) -> Result<Uri> {
        let uri: Uri = target
            .parse()
            .map_err(|e| Error::config(format!("Invalid fallback target {}: {}", target, e)))?;
        match uri.scheme_str() {
            Some("http") | Some("https") if uri.authority().is_some() => Ok(uri),
            _ => Err(Error::config(format!(
                "Fallback target must be an absolute http(s) URL: {}",
                target
            ))),
        }
    }

    /// Dial timeout as a duration
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            tls: None,
            log_level: Some("info".to_string()),
            dial_timeout: default_dial_timeout(),
            users: Vec::new(),
            acl: Vec::new(),
            whitelist: Vec::new(),
            fallback: FallbackConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_dial_timeout() -> u64 {
    10
}

/// TLS listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert: String,

    /// PEM private key
    pub key: String,
}

/// Proxy user
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// Username
    pub username: String,

    /// Password
    pub password: String,

    /// Data quota in bytes (absent or 0 means unlimited)
    #[serde(default)]
    pub quota: Option<u64>,
}

/// Fallback routing configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FallbackConfig {
    /// Host that always renders the panel
    pub host: Option<String>,

    /// Upstream URL for requests that fail admission
    pub target: Option<String>,
}
