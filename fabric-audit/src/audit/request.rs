//! Parsed request view consumed by the audit pipeline
//!
//! The pipeline never touches the raw transport. Callers hand it an
//! [`AuditRequest`]: method, URI, headers, peer address, the start-time
//! marker and the server environment the request ran under.

use http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Cluster identifier environment variable
pub const CLUSTER_ID_VAR: &str = "DFE_CLUSTER_ID";
/// App server identifier environment variable
pub const APP_SERVER_ID_VAR: &str = "DFE_APP_SERVER_ID";
/// Database server identifier environment variable
pub const DB_SERVER_ID_VAR: &str = "DFE_DB_SERVER_ID";
/// Web server identifier environment variable
pub const WEB_SERVER_ID_VAR: &str = "DFE_WEB_SERVER_ID";
/// Translated filesystem path of the request
pub const PATH_TRANSLATED_VAR: &str = "PATH_TRANSLATED";

/// Variables [`ServerEnv::from_process`] copies out of the process environment
pub const CAPTURED_VARS: &[&str] = &[
    CLUSTER_ID_VAR,
    APP_SERVER_ID_VAR,
    DB_SERVER_ID_VAR,
    WEB_SERVER_ID_VAR,
    PATH_TRANSLATED_VAR,
];

/// Server/environment variables visible to a request
///
/// Read-only once built. Usually captured once at startup and shared by
/// every request through an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEnv {
    vars: BTreeMap<String, String>,
}

impl ServerEnv {
    /// Empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture [`CAPTURED_VARS`] from the process environment
    pub fn from_process() -> Self {
        CAPTURED_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (*name, value)))
            .collect()
    }

    /// Add or replace a variable
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ServerEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An in-flight request as seen by the audit pipeline
#[derive(Debug, Clone)]
pub struct AuditRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    peer_addr: Option<IpAddr>,
    request_time: Option<f64>,
    server: Arc<ServerEnv>,
}

impl AuditRequest {
    /// Create a request with no headers, peer or environment
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            peer_addr: None,
            request_time: None,
            server: Arc::new(ServerEnv::default()),
        }
    }

    /// Create a request view from `http` request parts
    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone()).with_headers(parts.headers.clone())
    }

    /// Replace all headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Append a header value
    ///
    /// Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Set the immediate peer address
    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Set the request start-time marker (fractional seconds since epoch)
    pub fn with_request_time(mut self, seconds: f64) -> Self {
        self.request_time = Some(seconds);
        self
    }

    /// Set the server environment
    pub fn with_server_env(mut self, server: Arc<ServerEnv>) -> Self {
        self.server = server;
        self
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Immediate peer address, if known
    pub fn peer_addr(&self) -> Option<IpAddr> {
        self.peer_addr
    }

    /// Start-time marker, if stamped
    pub fn request_time(&self) -> Option<f64> {
        self.request_time
    }

    /// Server environment
    pub fn server(&self) -> &ServerEnv {
        &self.server
    }

    /// First value of a header as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path plus query string, as requested
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Host the request was addressed to, without port
    pub fn host(&self) -> Option<&str> {
        self.uri
            .host()
            .or_else(|| self.header("host").map(strip_port))
            .filter(|h| !h.is_empty())
    }
}

/// Drop a trailing `:port` from a Host header value
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
