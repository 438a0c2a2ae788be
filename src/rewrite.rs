//! Destination URL rewriting
//!
//! Tracking parameters are appended to the destination query string. A
//! parameter the destination already carries is never replaced, and a
//! destination that does not parse is returned untouched.

use std::borrow::Cow;
use url::Url;

use crate::config::TrackerConfig;
use crate::models::{MetaValue, Metadata};

/// Fallback tracking values used when the token metadata does not override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingDefaults {
    pub utm_source: String,
    pub utm_medium: String,
    pub ref_param: Option<String>,
}

impl TrackingDefaults {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            utm_source: config.utm_source.clone(),
            utm_medium: config.utm_medium.clone(),
            ref_param: config.ref_param.clone(),
        }
    }
}

impl Default for TrackingDefaults {
    fn default() -> Self {
        Self {
            utm_source: "affiliate".to_string(),
            utm_medium: "referral".to_string(),
            ref_param: None,
        }
    }
}

fn meta_param<'a>(metadata: &'a Metadata, key: &str) -> Option<Cow<'a, str>> {
    metadata.get(key).and_then(MetaValue::as_param)
}

/// Append `ref` and UTM parameters to `url` without clobbering existing ones.
pub fn append_tracking_params(
    url: &str,
    metadata: &Metadata,
    defaults: &TrackingDefaults,
) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let mut params: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

    let candidates = [
        ("ref", defaults.ref_param.as_deref().map(Cow::Borrowed)),
        (
            "utm_source",
            meta_param(metadata, "utm_source")
                .or(Some(Cow::Borrowed(defaults.utm_source.as_str()))),
        ),
        (
            "utm_medium",
            meta_param(metadata, "utm_medium")
                .or(Some(Cow::Borrowed(defaults.utm_medium.as_str()))),
        ),
        ("utm_campaign", meta_param(metadata, "campaign")),
        ("utm_content", meta_param(metadata, "shop")),
    ];

    for (key, value) in candidates {
        let Some(value) = value else { continue };
        if params.iter().any(|(existing, _)| existing == key) {
            continue;
        }
        params.push((key.to_string(), value.into_owned()));
    }

    if !params.is_empty() {
        parsed.query_pairs_mut().clear().extend_pairs(&params);
    }

    parsed.to_string()
}
