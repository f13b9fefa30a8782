//! # fabric-audit
//!
//! Request audit trail for multi-tenant hosting fabrics. Each audited API
//! request becomes one GELF 1.1 record carrying the request basics, the
//! caller's session data and the topology identity of the serving instance
//! (instance, owner, cluster, app/db/web server).
//!
//! ## Features
//!
//! - **Extraction**: timestamp, client IP chain, headers, query and path info
//! - **Topology resolution**: per-call, instance and environment metadata, field by field
//! - **GELF over UDP**: chunking for large records, runtime host reconfiguration
//! - **Fail-open**: recording never fails the request and never waits on the collector
//! - **axum middleware**: drop-in layer with excluded routes
//!
//! ## Example
//!
//! ```rust,no_run
//! use fabric_audit::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let dispatcher = Arc::new(AuditDispatcher::from_config(&config.audit)?);
//!     dispatcher.set_metadata([("cluster-id", "cluster-east")]);
//!
//!     let request = AuditRequest::new(http::Method::GET, "/api/v2/system".parse().unwrap());
//!     dispatcher.record_request("inst-42", &request, Default::default());
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gelf;
pub mod observability;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        AuditDispatcher, AuditLevel, AuditMiddleware, AuditRequest, AuditSession,
        DispatchStatsSnapshot, InstanceMetadata, ServerEnv,
    };
    pub use crate::config::{AuditConfig, Config};
    pub use crate::error::{Error, Result};
    pub use crate::gelf::{GelfHost, GelfMessage, Transport, UdpTransport};
    pub use crate::observability::init_tracing;
}
