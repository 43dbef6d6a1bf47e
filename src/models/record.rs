use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completed request as recorded by the log hook.
///
/// This is the authoritative record the analytics engine aggregates over.
/// `response_time_ms` is a wall-clock delta from request start to response
/// completion; `client_id` is the resolved identity (credential id, browser
/// id, or the bare IP for anonymous traffic).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    pub client_id: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub authenticated: bool,
}

/// Request-scoped identity resolved by the authentication stage.
///
/// Attached to the request's extension slot so downstream stages (the rate
/// limiter, the log hook) can read it without re-deriving anything.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub tier: String,
    pub api_key: Option<String>,
    pub authenticated: bool,
}

impl ClientIdentity {
    /// Identity for a request that presented no credential.
    pub fn anonymous(ip: &str) -> Self {
        Self {
            client_id: ip.to_string(),
            tier: "free".to_string(),
            api_key: None,
            authenticated: false,
        }
    }
}
