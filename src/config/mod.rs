use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::models::Metadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redirect_server: ServerConfig,
    pub tracker: TrackerConfig,
    pub client_ip: ClientIpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings consumed by the token codec, the URL rewriter and the click recorder.
///
/// Built once at startup and shared by reference; nothing in the crate reads
/// these values from a global.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Public origin of the tracking service, e.g. `https://yourapp.com`
    pub base_url: String,
    /// Mount path of the redirect endpoint (default `/a`)
    pub route_path: String,
    /// HMAC key used to sign tokens
    #[serde(skip_serializing)]
    pub secret_key: Vec<u8>,
    /// Number of hex characters of the HMAC-SHA256 digest carried in links
    pub signature_len: usize,
    /// Repeat clicks from the same client to the same destination within this
    /// window are not recorded again
    pub dedup_window: Duration,
    pub utm_source: String,
    pub utm_medium: String,
    /// Static `ref` tag appended to destinations (omitted when unset)
    pub ref_param: Option<String>,
    /// Maximum stored length, in characters, of user agent and referer
    pub max_field_len: usize,
    /// Upper bound for a single cache or store call made while recording
    pub collaborator_timeout: Duration,
    /// Metadata merged beneath caller metadata when generating links
    pub default_metadata: Metadata,
    /// Log every recorded click through the post-click hook
    pub log_clicks: bool,
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("base_url", &self.base_url)
            .field("route_path", &self.route_path)
            .field("secret_key", &"<redacted>")
            .field("signature_len", &self.signature_len)
            .field("dedup_window", &self.dedup_window)
            .field("utm_source", &self.utm_source)
            .field("utm_medium", &self.utm_medium)
            .field("ref_param", &self.ref_param)
            .field("max_field_len", &self.max_field_len)
            .field("collaborator_timeout", &self.collaborator_timeout)
            .field("default_metadata", &self.default_metadata)
            .field("log_clicks", &self.log_clicks)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Trust `CF-Connecting-IP`
    Cloudflare,
    /// Trust `X-Forwarded-For` / `Forwarded` from the listed proxies
    Standard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxy networks allowed to append to `X-Forwarded-For`
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    /// Fixed number of proxies in front of the service
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TRACKER_SECRET_KEY must be set")]
    MissingSecretKey,
    #[error("TRACKER_BASE_URL must be set")]
    MissingBaseUrl,
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl TrackerConfig {
    pub const DEFAULT_ROUTE_PATH: &'static str = "/a";
    pub const DEFAULT_SIGNATURE_LEN: usize = 16;
    pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_FIELD_LEN: usize = 500;
    pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(2);

    /// Configuration with every optional setting at its default.
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<Vec<u8>>) -> Self {
        Self {
            base_url: base_url.into(),
            route_path: Self::DEFAULT_ROUTE_PATH.to_string(),
            secret_key: secret_key.into(),
            signature_len: Self::DEFAULT_SIGNATURE_LEN,
            dedup_window: Self::DEFAULT_DEDUP_WINDOW,
            utm_source: "affiliate".to_string(),
            utm_medium: "referral".to_string(),
            ref_param: None,
            max_field_len: Self::DEFAULT_MAX_FIELD_LEN,
            collaborator_timeout: Self::DEFAULT_COLLABORATOR_TIMEOUT,
            default_metadata: Metadata::new(),
            log_clicks: false,
        }
    }

    /// Check the settings that make the service unusable when wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if !(8..=64).contains(&self.signature_len) {
            return Err(ConfigError::Invalid {
                var: "TRACKER_SIGNATURE_LEN",
                reason: format!("{} is outside 8..=64", self.signature_len),
            });
        }
        if self.dedup_window.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TRACKER_DEDUP_WINDOW_SECS",
                reason: "window must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Route path normalised to `/segment` form, or empty for the root.
    pub fn normalized_route_path(&self) -> String {
        let trimmed = self.route_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

fn env_parse<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn env_flag(var: &str) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./affiliate_tracker.db?mode=rwc".to_string());
        let max_connections = env_parse::<u32>("DATABASE_MAX_CONNECTIONS")?.unwrap_or(10);

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = env_parse::<u16>("REDIRECT_PORT")?.unwrap_or(3000);

        let tracker = Self::tracker_from_env()?;
        tracker.validate().context("invalid tracker configuration")?;

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            "standard" => TrustedProxyMode::Standard,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, cloudflare, standard"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<IpNet>()
                        .with_context(|| format!("TRUSTED_PROXIES entry '{s}' is not a CIDR"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            tracker,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies: env_parse::<usize>("NUM_TRUSTED_PROXIES")?,
            },
        })
    }

    fn tracker_from_env() -> Result<TrackerConfig, ConfigError> {
        let base_url =
            std::env::var("TRACKER_BASE_URL").map_err(|_| ConfigError::MissingBaseUrl)?;
        let secret_key =
            std::env::var("TRACKER_SECRET_KEY").map_err(|_| ConfigError::MissingSecretKey)?;

        let mut tracker = TrackerConfig::new(base_url, secret_key.into_bytes());

        if let Ok(route_path) = std::env::var("TRACKER_ROUTE_PATH") {
            tracker.route_path = route_path;
        }
        if let Some(len) = env_parse::<usize>("TRACKER_SIGNATURE_LEN")? {
            tracker.signature_len = len;
        }
        if let Some(secs) = env_parse::<u64>("TRACKER_DEDUP_WINDOW_SECS")? {
            tracker.dedup_window = Duration::from_secs(secs);
        }
        if let Ok(source) = std::env::var("TRACKER_UTM_SOURCE") {
            tracker.utm_source = source;
        }
        if let Ok(medium) = std::env::var("TRACKER_UTM_MEDIUM") {
            tracker.utm_medium = medium;
        }
        tracker.ref_param = std::env::var("TRACKER_REF_PARAM")
            .ok()
            .filter(|v| !v.trim().is_empty());
        if let Some(len) = env_parse::<usize>("TRACKER_MAX_FIELD_LEN")? {
            tracker.max_field_len = len;
        }
        if let Some(ms) = env_parse::<u64>("TRACKER_COLLABORATOR_TIMEOUT_MS")? {
            tracker.collaborator_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var("TRACKER_DEFAULT_METADATA") {
            tracker.default_metadata =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    var: "TRACKER_DEFAULT_METADATA",
                    reason: e.to_string(),
                })?;
        }
        tracker.log_clicks = env_flag("TRACKER_LOG_CLICKS");

        Ok(tracker)
    }
}
