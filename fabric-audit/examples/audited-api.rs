//! Example: Auditing an axum API
//!
//! Every request except the health probe is shipped as a GELF record to the
//! collector named in `audit.host` (default localhost:12201). A fake auth
//! layer attaches session data the way a real one would.
//!
//! Run with: cargo run --example audited-api
//!
//! Watch the records with: nc -klu 12201

use axum::{
    extract::{Path, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use fabric_audit::prelude::*;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

async fn health() -> &'static str {
    "ok"
}

async fn list_tables() -> Json<Value> {
    Json(json!({ "resource": ["todo", "contact"] }))
}

async fn get_user(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "id": id, "name": "alice" }))
}

/// Stand-in for an authentication layer
async fn fake_session(mut request: Request, next: Next) -> Response {
    let session = json!({
        "user_id": 12,
        "email": "alice@example.com",
        "metadata": { "owner-email-address": "owner@example.com" },
    });
    if let Value::Object(map) = session {
        request.extensions_mut().insert(AuditSession(map));
    }
    next.run(request).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_for_service("audited-api")?;
    init_tracing(&config)?;

    let dispatcher = Arc::new(AuditDispatcher::from_config(&config.audit)?);
    dispatcher.set_metadata([("cluster-id", "cluster-east"), ("app-server-id", "app-01")]);

    let audit = AuditMiddleware::from_config(
        Arc::clone(&dispatcher),
        &config.audit,
        &config.service.name,
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v2/db/_table", get(list_tables))
        .route("/api/v2/user/{id}", get(get_user))
        .layer(middleware::from_fn_with_state(audit, AuditMiddleware::middleware))
        .layer(middleware::from_fn(fake_session));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    tracing::info!("Listening on http://127.0.0.1:8080");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    dispatcher.shutdown().await;
    tracing::info!(stats = ?dispatcher.stats(), "Audit records flushed");

    Ok(())
}
