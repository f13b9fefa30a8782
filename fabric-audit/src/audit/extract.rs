//! Canonical request fields for an audit record
//!
//! [`extract`] is a pure read of an [`AuditRequest`]. Absent or malformed
//! inputs degrade to defaults; it has no failure path.

use axum::extract::Query;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::request::{AuditRequest, PATH_TRANSLATED_VAR};

/// Header carrying the caller's session token
pub const SESSION_TOKEN_HEADER: &str = "x-dreamfactory-session-token";
/// Header naming the calling application
pub const APP_NAME_HEADER: &str = "x-dreamfactory-application-name";
/// Secondary header naming the calling application
pub const FALLBACK_APP_NAME_HEADER: &str = "x-application-name";
/// Query parameter naming the calling application
pub const APP_NAME_PARAM: &str = "app_name";

/// Fields derived from the request itself
///
/// Computed fresh for every record, never cached. Serializes to the
/// top-level keys of the outbound record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBasicFields {
    /// Start-time marker in fractional epoch seconds, 0 when unknown
    pub request_timestamp: f64,
    pub user_agent: Option<String>,
    /// Client IP chain, nearest hop first and originating client last
    pub source_ip: Vec<String>,
    pub content_type: Option<String>,
    /// Declared body length, 0 when absent or unparseable
    pub content_length: u64,
    pub token: Option<String>,
    pub app_name: Option<String>,
    /// Placeholder for topology identity, replaced by request records
    pub dfe: serde_json::Map<String, serde_json::Value>,
    pub host: Option<String>,
    pub method: String,
    pub path_info: String,
    pub path_translated: Option<String>,
    pub query: BTreeMap<String, String>,
}

/// Read the canonical field set from a request
pub fn extract(request: &AuditRequest) -> RequestBasicFields {
    let query = query_params(request);

    let app_name = query
        .get(APP_NAME_PARAM)
        .cloned()
        .or_else(|| request.header(APP_NAME_HEADER).map(String::from))
        .or_else(|| request.header(FALLBACK_APP_NAME_HEADER).map(String::from));

    RequestBasicFields {
        request_timestamp: request.request_time().unwrap_or(0.0),
        user_agent: request.header("user-agent").map(String::from),
        source_ip: client_ips(request),
        content_type: request.header("content-type").map(String::from),
        content_length: content_length(request),
        token: request.header(SESSION_TOKEN_HEADER).map(String::from),
        app_name,
        dfe: serde_json::Map::new(),
        host: request.host().map(String::from),
        method: request.method().to_string(),
        path_info: request.uri().path().to_string(),
        path_translated: request.server().get(PATH_TRANSLATED_VAR).map(String::from),
        query,
    }
}

fn content_length(request: &AuditRequest) -> u64 {
    request
        .header("content-length")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn query_params(request: &AuditRequest) -> BTreeMap<String, String> {
    Query::<BTreeMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default()
}

/// Build the client IP chain
///
/// `X-Forwarded-For` lists the origin first and each proxy after it; the
/// immediate peer is the hop we trust most. The chain is reported nearest
/// first: the peer, then the forwarded entries in reverse. Values are not
/// validated.
fn client_ips(request: &AuditRequest) -> Vec<String> {
    let mut forwarded: Vec<String> = request
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .collect();
    forwarded.reverse();

    let mut chain = Vec::with_capacity(forwarded.len() + 1);
    if let Some(peer) = request.peer_addr() {
        chain.push(peer.to_string());
    }
    chain.extend(forwarded);
    chain
}
