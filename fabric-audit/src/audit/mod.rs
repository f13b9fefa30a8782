//! Request audit trail
//!
//! Captures a fixed set of request fields, resolves the deployment identity
//! of the serving instance and ships the result as a GELF record.
//!
//! # Architecture
//!
//! [`AuditDispatcher`] owns the pipeline: record assembly runs on the caller,
//! delivery runs on a background sender fed by a bounded queue. The HTTP
//! middleware and application code share one dispatcher behind an `Arc`.
//! Recording never fails and never blocks request handling.
//!
//! # Metadata precedence
//!
//! Each topology field is resolved independently: per-call `metadata`
//! first, then the dispatcher's instance metadata, then the server
//! environment (`DFE_*` variables). `instance_owner_id` only ever comes from
//! per-call metadata.

pub mod dispatcher;
pub mod extract;
pub mod level;
pub mod metadata;
pub mod middleware;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{AuditDispatcher, DispatchStatsSnapshot, METADATA_KEY};
pub use extract::{
    extract, RequestBasicFields, APP_NAME_HEADER, APP_NAME_PARAM, FALLBACK_APP_NAME_HEADER,
    SESSION_TOKEN_HEADER,
};
pub use level::AuditLevel;
pub use metadata::{normalize_key, resolve, DfeFields, InstanceMetadata, TopologyField, OWNER_KEY};
pub use middleware::{path_matches_patterns, AuditMiddleware, AuditSession};
pub use request::{
    AuditRequest, ServerEnv, APP_SERVER_ID_VAR, CAPTURED_VARS, CLUSTER_ID_VAR, DB_SERVER_ID_VAR,
    PATH_TRANSLATED_VAR, WEB_SERVER_ID_VAR,
};
