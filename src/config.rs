//! Runtime configuration
//!
//! Built-in defaults, then `config/default.toml`, then `config/local.toml`,
//! then `FEDGATE__*` environment variables.

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub instance: InstanceConfig,
    pub admin: AdminConfig,
    pub federation: FederationConfig,
    pub key_cache: KeyCacheConfig,
    pub logging: LoggingConfig,
}

/// Listener and public origin
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public domain; handles on it are local
    pub domain: String,
    pub protocol: String,
}

impl ServerConfig {
    /// `protocol://domain`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Actor URI for a local username.
    pub fn actor_url(&self, username: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url(),
            crate::identity::ACTOR_PATH_MARKER,
            username
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; created with its parent directory when missing
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Administrative contact advertised in the federation User-Agent.
    ///
    /// Falls back to the instance base URL when unset.
    pub admin_contact: Option<String>,
}

/// Local actor recorded at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_username")]
    pub username: String,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

/// Inbound federation authentication settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Timeout for one outbound key fetch attempt, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Extra attempts after a transport error or 5xx (0..=3)
    pub fetch_retries: u32,
    /// Maximum tolerated distance between the signed Date header and now
    pub max_clock_skew_secs: i64,
    /// Header names that every inbound signature must cover
    #[serde(default = "default_required_signed_headers")]
    pub required_signed_headers: Vec<String>,
    /// Permit key fetches to loopback/private addresses (tests, LAN setups)
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_required_signed_headers() -> Vec<String> {
    vec![
        "(request-target)".to_string(),
        "host".to_string(),
        "date".to_string(),
    ]
}

/// Key cache backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyCacheBackend {
    /// Shared SQLite table; survives worker restarts
    #[default]
    Sqlite,
    /// Process-local map
    Memory,
    /// Every verification fetches the key
    None,
}

/// Public key cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyCacheConfig {
    #[serde(default)]
    pub backend: KeyCacheBackend,
    /// Entry lifetime in seconds (default: 3600)
    pub ttl_seconds: u64,
    /// Interval of the background pruning task in seconds
    pub prune_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter level for the `fedgate` target when `RUST_LOG` is unset
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl AppConfig {
    /// Load and validate the layered configuration.
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/fedgate.db")?
            .set_default("federation.fetch_timeout_ms", 5000)?
            .set_default("federation.fetch_retries", 1)?
            .set_default("federation.max_clock_skew_secs", 300)?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("key_cache.backend", "sqlite")?
            .set_default("key_cache.ttl_seconds", 3600)?
            .set_default("key_cache.prune_interval_seconds", 600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Contact advertised to remote peers in the User-Agent.
    pub fn admin_contact(&self) -> String {
        self.instance
            .admin_contact
            .as_deref()
            .map(str::trim)
            .filter(|contact| !contact.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.server.base_url())
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MAX_FETCH_RETRIES: u32 = 3;

        if self.server.domain.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "server.domain must not be empty".to_string(),
            ));
        }

        if self.federation.fetch_timeout_ms == 0 {
            return Err(crate::error::AppError::Config(
                "federation.fetch_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.federation.fetch_retries > MAX_FETCH_RETRIES {
            return Err(crate::error::AppError::Config(format!(
                "federation.fetch_retries must be at most {}",
                MAX_FETCH_RETRIES
            )));
        }

        if self.federation.max_clock_skew_secs <= 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_clock_skew_secs must be greater than 0".to_string(),
            ));
        }

        if self.key_cache.backend != KeyCacheBackend::None && self.key_cache.ttl_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "key_cache.ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Serving a local development domain"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        if self.federation.allow_private_hosts {
            tracing::warn!("Key fetches to private and loopback hosts are allowed");
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/fedgate-test.db"),
            },
            instance: InstanceConfig {
                admin_contact: None,
            },
            admin: AdminConfig {
                username: "admin".to_string(),
            },
            federation: FederationConfig {
                fetch_timeout_ms: 5000,
                fetch_retries: 1,
                max_clock_skew_secs: 300,
                required_signed_headers: default_required_signed_headers(),
                allow_private_hosts: false,
            },
            key_cache: KeyCacheConfig {
                backend: KeyCacheBackend::Memory,
                ttl_seconds: 3600,
                prune_interval_seconds: 600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "social.example.com".to_string();
        config.server.protocol = "http".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }

    #[test]
    fn validate_rejects_excessive_retries() {
        let mut config = valid_config();
        config.federation.fetch_retries = 10;

        let error = config.validate().expect_err("retries must be bounded");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("fetch_retries")
        ));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = valid_config();
        config.federation.fetch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn admin_contact_falls_back_to_base_url() {
        let mut config = valid_config();
        assert_eq!(config.admin_contact(), "http://localhost");

        config.instance.admin_contact = Some("https://about.example.social".to_string());
        assert_eq!(config.admin_contact(), "https://about.example.social");
    }

    #[test]
    fn actor_url_uses_actor_path_marker() {
        let config = valid_config();
        assert_eq!(
            config.server.actor_url("alice"),
            "http://localhost/ap/users/alice"
        );
    }
}
