//! Topology identity resolution
//!
//! Each topology field resolves independently:
//! 1. per-call metadata (the `metadata` entry of caller session data)
//! 2. instance metadata configured on the dispatcher
//! 3. a fixed variable in the request's server environment
//! 4. absent
//!
//! Metadata keys are normalized by rewriting `-` to `_`, so `cluster-id`
//! and `cluster_id` are the same key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::request::{
    ServerEnv, APP_SERVER_ID_VAR, CLUSTER_ID_VAR, DB_SERVER_ID_VAR, WEB_SERVER_ID_VAR,
};

/// Per-call key naming the instance owner
pub const OWNER_KEY: &str = "owner_email_address";

/// Normalize a metadata key
pub fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

/// Topology fields resolved through all three tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyField {
    Cluster,
    AppServer,
    DbServer,
    WebServer,
}

impl TopologyField {
    /// All fields, in record order
    pub const ALL: [TopologyField; 4] = [
        Self::Cluster,
        Self::AppServer,
        Self::DbServer,
        Self::WebServer,
    ];

    /// Normalized metadata key
    pub fn key(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster_id",
            Self::AppServer => "app_server_id",
            Self::DbServer => "db_server_id",
            Self::WebServer => "web_server_id",
        }
    }

    /// Server environment variable consulted last
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Cluster => CLUSTER_ID_VAR,
            Self::AppServer => APP_SERVER_ID_VAR,
            Self::DbServer => DB_SERVER_ID_VAR,
            Self::WebServer => WEB_SERVER_ID_VAR,
        }
    }
}

/// Metadata map with normalized keys
///
/// Used both for the dispatcher's instance metadata and for per-call
/// metadata pulled out of session data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMetadata {
    values: BTreeMap<String, String>,
}

impl InstanceMetadata {
    /// Build from any key/value pairs, normalizing keys
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            values: entries
                .into_iter()
                .map(|(k, v)| (normalize_key(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// Build from a JSON object
    ///
    /// Strings are taken as-is, numbers and booleans as their text, and
    /// nulls, arrays and objects are skipped. Anything other than an object
    /// yields empty metadata.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        Self::new(object.iter().filter_map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k, text))
        }))
    }

    /// Look up a value; the key is normalized first
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(String::as_str)
    }

    /// Whether no values are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolved topology identity, the `dfe` section of a request record
///
/// Absent fields serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfeFields {
    pub instance_id: String,
    pub instance_owner_id: Option<String>,
    pub cluster_id: Option<String>,
    pub app_server_id: Option<String>,
    pub db_server_id: Option<String>,
    pub web_server_id: Option<String>,
}

impl DfeFields {
    fn set(&mut self, field: TopologyField, value: Option<String>) {
        let slot = match field {
            TopologyField::Cluster => &mut self.cluster_id,
            TopologyField::AppServer => &mut self.app_server_id,
            TopologyField::DbServer => &mut self.db_server_id,
            TopologyField::WebServer => &mut self.web_server_id,
        };
        *slot = value;
    }
}

/// Resolve the `dfe` section for one request
///
/// `instance_owner_id` comes only from per-call metadata; there is no
/// instance or environment fallback for it.
pub fn resolve(
    instance_id: &str,
    per_call: Option<&InstanceMetadata>,
    instance: Option<&InstanceMetadata>,
    server: &ServerEnv,
) -> DfeFields {
    let mut dfe = DfeFields {
        instance_id: instance_id.to_string(),
        instance_owner_id: per_call.and_then(|m| m.get(OWNER_KEY)).map(String::from),
        ..DfeFields::default()
    };

    for field in TopologyField::ALL {
        let value = per_call
            .and_then(|m| m.get(field.key()))
            .or_else(|| instance.and_then(|m| m.get(field.key())))
            .or_else(|| server.get(field.env_var()))
            .map(String::from);
        dfe.set(field, value);
    }

    dfe
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_keys_are_equivalent() {
        let dashed = InstanceMetadata::new([("cluster-id", "c1"), ("app-server-id", "a1")]);
        assert_eq!(dashed.get("cluster_id"), Some("c1"));
        assert_eq!(dashed.get("cluster-id"), Some("c1"));
        assert_eq!(dashed.get("app_server_id"), Some("a1"));

        let underscored = InstanceMetadata::new([("cluster_id", "c1"), ("app_server_id", "a1")]);
        assert_eq!(dashed, underscored);
    }

    #[test]
    fn test_from_json_skips_non_scalars() {
        let metadata = InstanceMetadata::from_json(&json!({
            "cluster-id": "c1",
            "db-server-id": 42,
            "web-server-id": null,
            "tags": ["a", "b"],
        }));
        assert_eq!(metadata.get("cluster_id"), Some("c1"));
        assert_eq!(metadata.get("db_server_id"), Some("42"));
        assert_eq!(metadata.get("web_server_id"), None);
        assert_eq!(metadata.get("tags"), None);

        assert!(InstanceMetadata::from_json(&json!("nope")).is_empty());
    }

    #[test]
    fn test_per_call_wins_over_instance() {
        let per_call = InstanceMetadata::new([("cluster-id", "per-call")]);
        let instance = InstanceMetadata::new([("cluster_id", "instance")]);
        let server = ServerEnv::new().with_var(CLUSTER_ID_VAR, "env");

        let dfe = resolve("i-1", Some(&per_call), Some(&instance), &server);
        assert_eq!(dfe.cluster_id.as_deref(), Some("per-call"));
    }

    #[test]
    fn test_instance_wins_over_environment() {
        let instance = InstanceMetadata::new([("db-server-id", "db-instance")]);
        let server = ServerEnv::new().with_var(DB_SERVER_ID_VAR, "db-env");

        let dfe = resolve("i-1", None, Some(&instance), &server);
        assert_eq!(dfe.db_server_id.as_deref(), Some("db-instance"));
    }

    #[test]
    fn test_environment_fallback() {
        let per_call = InstanceMetadata::new([("cluster-id", "c1")]);
        let instance = InstanceMetadata::new([("app-server-id", "a1")]);
        let server = ServerEnv::new()
            .with_var(WEB_SERVER_ID_VAR, "web-env")
            .with_var(CLUSTER_ID_VAR, "cluster-env");

        let dfe = resolve("i-1", Some(&per_call), Some(&instance), &server);
        assert_eq!(dfe.cluster_id.as_deref(), Some("c1"));
        assert_eq!(dfe.app_server_id.as_deref(), Some("a1"));
        assert_eq!(dfe.web_server_id.as_deref(), Some("web-env"));
        assert_eq!(dfe.db_server_id, None);
    }

    #[test]
    fn test_owner_has_no_fallback() {
        let instance = InstanceMetadata::new([("owner-email-address", "ops@example.com")]);
        let dfe = resolve("i-1", None, Some(&instance), &ServerEnv::new());
        assert_eq!(dfe.instance_owner_id, None);

        let per_call = InstanceMetadata::new([("owner-email-address", "owner@example.com")]);
        let dfe = resolve("i-1", Some(&per_call), None, &ServerEnv::new());
        assert_eq!(dfe.instance_owner_id.as_deref(), Some("owner@example.com"));
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let dfe = resolve("inst-42", None, None, &ServerEnv::new());
        assert_eq!(
            serde_json::to_value(&dfe).unwrap(),
            json!({
                "instance_id": "inst-42",
                "instance_owner_id": null,
                "cluster_id": null,
                "app_server_id": null,
                "db_server_id": null,
                "web_server_id": null,
            })
        );
    }
}
