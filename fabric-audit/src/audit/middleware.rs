//! Audit middleware for HTTP request logging
//!
//! Thin axum integration over an injected [`AuditDispatcher`]: every request
//! not matching an excluded route is recorded with `record_request` before
//! it reaches the handler. The middleware never changes the request or the
//! response.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use super::dispatcher::AuditDispatcher;
use super::level::AuditLevel;
use super::request::{AuditRequest, ServerEnv};
use crate::config::AuditConfig;
use crate::gelf::message::now_seconds;

/// Caller session data to record under `user`
///
/// Insert as a request extension from an earlier layer (typically the
/// authentication middleware). A `metadata` entry is consumed for topology
/// resolution instead of being recorded.
#[derive(Clone, Debug, Default)]
pub struct AuditSession(pub Map<String, Value>);

/// Middleware state for request auditing
///
/// Apply with `axum::middleware::from_fn_with_state`.
///
/// # Example
///
/// ```rust,ignore
/// use fabric_audit::audit::{AuditDispatcher, AuditMiddleware};
///
/// let dispatcher = Arc::new(AuditDispatcher::from_config(&config.audit)?);
/// let mw = AuditMiddleware::new(dispatcher, "inst-42");
///
/// let app = Router::new()
///     .route("/api/v2/system", get(handler))
///     .layer(axum::middleware::from_fn_with_state(mw, AuditMiddleware::middleware));
/// ```
#[derive(Clone)]
pub struct AuditMiddleware {
    dispatcher: Arc<AuditDispatcher>,
    instance_id: Arc<str>,
    server: Arc<ServerEnv>,
    level: AuditLevel,
    excluded_routes: Arc<[String]>,
}

impl AuditMiddleware {
    /// Audit requests as `instance_id`, with the process environment as server context
    pub fn new(dispatcher: Arc<AuditDispatcher>, instance_id: &str) -> Self {
        Self {
            dispatcher,
            instance_id: Arc::from(instance_id),
            server: Arc::new(ServerEnv::from_process()),
            level: AuditLevel::default(),
            excluded_routes: Arc::from(AuditConfig::default().excluded_routes),
        }
    }

    /// Build from configuration
    ///
    /// Uses `instance_id` (falling back to `service_name`) and `excluded_routes`.
    pub fn from_config(
        dispatcher: Arc<AuditDispatcher>,
        config: &AuditConfig,
        service_name: &str,
    ) -> Self {
        let instance_id = config.instance_id.as_deref().unwrap_or(service_name);
        Self::new(dispatcher, instance_id).with_excluded_routes(config.excluded_routes.clone())
    }

    /// Replace the server environment attached to each request
    pub fn with_server_env(mut self, server: ServerEnv) -> Self {
        self.server = Arc::new(server);
        self
    }

    /// Record at a level other than INFO
    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    /// Replace the excluded route patterns
    pub fn with_excluded_routes(mut self, routes: Vec<String>) -> Self {
        self.excluded_routes = Arc::from(routes);
        self
    }

    /// Middleware function for axum
    pub async fn middleware(
        State(mw): State<Self>,
        request: Request<Body>,
        next: Next,
    ) -> Response {
        if path_matches_patterns(request.uri().path(), &mw.excluded_routes) {
            return next.run(request).await;
        }

        let mut audit_request = AuditRequest::new(request.method().clone(), request.uri().clone())
            .with_headers(request.headers().clone())
            .with_request_time(now_seconds())
            .with_server_env(Arc::clone(&mw.server));
        if let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            audit_request = audit_request.with_peer_addr(peer.ip());
        }

        let session = request
            .extensions()
            .get::<AuditSession>()
            .map(|s| s.0.clone())
            .unwrap_or_default();

        mw.dispatcher
            .record_request_with(&mw.instance_id, &audit_request, session, mw.level, None);

        next.run(request).await
    }
}

/// Check if a path matches any of the given glob patterns
///
/// Supports simple wildcard matching:
/// - `*` matches within a segment
/// - trailing `/*` or `/**` matches any remaining segments
pub fn path_matches_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| path_matches_glob(path, pattern))
}

fn path_matches_glob(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path == prefix || below(path, prefix).is_some();
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return below(path, prefix).is_some_and(|rest| !rest.is_empty());
    }

    if let Some((head, tail)) = pattern.split_once('*') {
        if !tail.contains('*') {
            return path.len() >= head.len() + tail.len()
                && path.starts_with(head)
                && path.ends_with(tail);
        }
    }

    false
}

/// Remainder of `path` under the `prefix` directory
fn below<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('/')
}
