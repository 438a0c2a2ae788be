use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{
        header::{HeaderMap, LOCATION, REFERER, USER_AGENT},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::config::{ClientIpConfig, ConfigError, TrackerConfig};
use crate::recorder::{ClickRecorder, RequestMetadata};
use crate::rewrite::{append_tracking_params, TrackingDefaults};
use crate::token::TokenCodec;

use super::ip_extractor::extract_client_ip;

/// Name of the query parameter carrying the token signature
pub const SIGNATURE_PARAM: &str = "s";

pub struct RedirectState {
    pub codec: TokenCodec,
    pub recorder: Arc<ClickRecorder>,
    pub tracking: TrackingDefaults,
    pub client_ip: ClientIpConfig,
}

impl RedirectState {
    pub fn new(
        config: &TrackerConfig,
        client_ip: ClientIpConfig,
        recorder: Arc<ClickRecorder>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            codec: TokenCodec::from_config(config)?,
            recorder,
            tracking: TrackingDefaults::from_config(config),
            client_ip,
        })
    }
}

/// Verify a tracking token, record the click and redirect to the destination
pub async fn redirect_click(
    State(state): State<Arc<RedirectState>>,
    Path(payload): Path<String>,
    RawQuery(query): RawQuery,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(signature) = query.as_deref().and_then(signature_param) else {
        warn!("tracking link without signature");
        return invalid_link();
    };

    let token = match state.codec.decode(&payload, &signature) {
        Ok(token) => token,
        Err(err) => {
            warn!(reason = %err, "rejected tracking link");
            return invalid_link();
        }
    };

    let client_ip = extract_client_ip(&headers, addr.ip(), &state.client_ip);
    let request = RequestMetadata {
        user_agent: header_string(&headers, USER_AGENT.as_str()),
        referer: header_string(&headers, REFERER.as_str()),
    };

    // Detached so a cancelled request still finishes recording
    let recorder = Arc::clone(&state.recorder);
    let destination_url = token.destination_url.clone();
    let metadata = token.metadata.clone();
    tokio::spawn(async move {
        recorder
            .record(&destination_url, &metadata, &client_ip.to_string(), &request)
            .await;
    });

    let target = append_tracking_params(&token.destination_url, &token.metadata, &state.tracking);
    match HeaderValue::try_from(target) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response(),
        Err(_) => {
            warn!("destination is not a valid Location header");
            invalid_link()
        }
    }
}

fn signature_param(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == SIGNATURE_PARAM)
        .map(|(_, value)| value.into_owned())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Single response for every token failure so callers cannot tell them apart
fn invalid_link() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid link").into_response()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
