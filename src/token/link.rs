use crate::config::{ConfigError, TrackerConfig};
use crate::models::Metadata;

use super::codec::{TokenCodec, TokenError};

/// Builds shareable tracking links of the form `<base><route>/<payload>?s=<signature>`.
#[derive(Debug, Clone)]
pub struct LinkGenerator {
    codec: TokenCodec,
    base_url: String,
    route_path: String,
    default_metadata: Metadata,
}

impl LinkGenerator {
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        if config.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }

        Ok(Self {
            codec: TokenCodec::from_config(config)?,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            route_path: config.normalized_route_path(),
            default_metadata: config.default_metadata.clone(),
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Link for `destination_url` carrying exactly `metadata`.
    pub fn generate(
        &self,
        destination_url: &str,
        metadata: &Metadata,
    ) -> Result<String, TokenError> {
        let token = self.codec.encode(destination_url, metadata)?;
        Ok(format!(
            "{}{}/{}?s={}",
            self.base_url, self.route_path, token.payload, token.signature
        ))
    }

    /// Like [`generate`](Self::generate), with the configured default metadata
    /// merged underneath. Caller-supplied keys win.
    pub fn track_url(
        &self,
        destination_url: &str,
        metadata: &Metadata,
    ) -> Result<String, TokenError> {
        let mut merged = self.default_metadata.clone();
        merged.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.generate(destination_url, &merged)
    }
}
