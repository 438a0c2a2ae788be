use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::Metadata;

/// A persisted click. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Click {
    pub id: i64,
    pub destination_url: String,
    /// Client address with the last IPv4 octet zeroed
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub metadata: Json<Metadata>,
    /// Unix timestamp (seconds)
    pub clicked_at: i64,
}

impl Click {
    /// Host part of the destination, if it parses as a URL.
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.destination_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Click data handed to a click store for insertion.
#[derive(Debug, Clone, Serialize)]
pub struct NewClick {
    pub destination_url: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub metadata: Metadata,
    pub clicked_at: i64,
}

impl NewClick {
    pub fn into_click(self, id: i64) -> Click {
        Click {
            id,
            destination_url: self.destination_url,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            referer: self.referer,
            metadata: Json(self.metadata),
            clicked_at: self.clicked_at,
        }
    }
}
