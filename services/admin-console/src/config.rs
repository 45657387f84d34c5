//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The JWT signing secret is read from JWT_ACCESS_SECRET or
//! `auth.jwt_secret_file`, never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Listener and request handling settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Marks session cookies `Secure`.
    #[serde(default)]
    pub production: bool,
}

/// Where the backend API and the public member site live
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base of the public site that member QR codes point at.
    #[serde(default = "default_front_url")]
    pub front_url: String,
}

/// Route gate settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(skip)]
    pub jwt_secret: Option<Secret<String>>,
    #[serde(default)]
    pub jwt_secret_file: Option<PathBuf>,
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            front_url: default_front_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_secret_file: None,
            protected_prefixes: default_protected_prefixes(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_api_url() -> String {
    "http://localhost:3000".into()
}

fn default_front_url() -> String {
    "http://localhost:3003".into()
}

fn default_protected_prefixes() -> Vec<String> {
    vec!["/members".into()]
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order:
    /// 1. JWT_ACCESS_SECRET env var
    /// 2. jwt_secret_file path from config
    ///
    /// A missing secret is not an error here; the gate then refuses every
    /// protected request.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_URL") {
            config.upstream.api_url = url;
        }
        if let Ok(url) = std::env::var("FRONT_URL") {
            config.upstream.front_url = url;
        }
        let env_is_production = ["NODE_ENV", "APP_ENV"]
            .iter()
            .any(|key| std::env::var(key).is_ok_and(|v| v == "production"));
        if env_is_production {
            config.server.production = true;
        }

        validate_url("api_url", &config.upstream.api_url)?;
        validate_url("front_url", &config.upstream.front_url)?;
        config.upstream.api_url = config.upstream.api_url.trim_end_matches('/').to_owned();
        config.upstream.front_url = config.upstream.front_url.trim_end_matches('/').to_owned();

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if let Some(prefix) = config
            .auth
            .protected_prefixes
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            return Err(common::Error::Config(format!(
                "protected_prefixes entries must start with '/', got: {prefix}"
            )));
        }
        for prefix in &mut config.auth.protected_prefixes {
            let trimmed = prefix.trim_end_matches('/');
            if trimmed.is_empty() {
                // would also gate /login and loop every redirect
                return Err(common::Error::Config(
                    "protected_prefixes cannot contain the root path '/'".into(),
                ));
            }
            *prefix = trimmed.to_owned();
        }

        // env var takes precedence over file
        if let Ok(secret) = std::env::var("JWT_ACCESS_SECRET") {
            let secret = Secret::new(secret);
            if !secret.is_blank() {
                config.auth.jwt_secret = Some(secret);
            }
        } else if let Some(ref secret_file) = config.auth.jwt_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read jwt_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = Secret::new(secret.trim().to_owned());
            if !secret.is_blank() {
                config.auth.jwt_secret = Some(secret);
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("member-console.toml")
    }
}

fn validate_url(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}
