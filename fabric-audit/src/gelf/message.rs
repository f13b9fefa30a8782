//! GELF 1.1 message encoder
//!
//! Standard fields (`version`, `host`, `short_message`, `full_message`,
//! `timestamp`, `level`) are written directly. Every other record key becomes
//! an additional field with a leading underscore, flattened to the string or
//! number values collectors accept.

use serde_json::{Map, Number, Value};

use crate::audit::AuditLevel;
use crate::error::{Error, Result};

const GELF_VERSION: &str = "1.1";

/// Keys that map onto standard GELF fields instead of additional fields
const STANDARD_KEYS: &[&str] = &[
    "version",
    "host",
    "short_message",
    "full_message",
    "timestamp",
    "level",
];

/// Additional field name collectors reserve for themselves
const RESERVED_KEY: &str = "id";

/// A structured record on its way to a GELF collector
#[derive(Debug, Clone, PartialEq)]
pub struct GelfMessage {
    record: Map<String, Value>,
    source_host: Option<String>,
    level: Option<AuditLevel>,
    short_message: Option<String>,
    full_message: Option<String>,
}

impl GelfMessage {
    /// Wrap a flattened audit record
    pub fn from_record(record: Map<String, Value>) -> Self {
        Self {
            record,
            source_host: None,
            level: None,
            short_message: None,
            full_message: None,
        }
    }

    /// Host reported when the record carries no `host` string
    pub fn with_source_host(mut self, host: impl Into<String>) -> Self {
        self.source_host = Some(host.into());
        self
    }

    pub fn set_level(&mut self, level: AuditLevel) -> &mut Self {
        self.level = Some(level);
        self
    }

    pub fn set_short_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.short_message = Some(message.into());
        self
    }

    pub fn set_full_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.full_message = Some(message.into());
        self
    }

    /// The record this message was built from
    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    pub fn level(&self) -> Option<AuditLevel> {
        self.level
    }

    pub fn short_message(&self) -> Option<&str> {
        self.short_message.as_deref()
    }

    pub fn full_message(&self) -> Option<&str> {
        self.full_message.as_deref()
    }

    /// Build the GELF JSON object
    ///
    /// Fails unless level, short message and full message are all set and
    /// the short message is non-empty.
    pub fn to_gelf(&self) -> Result<Value> {
        let level = self
            .level
            .ok_or_else(|| Error::Encode("level is not set".to_string()))?;
        let short_message = self
            .short_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| Error::Encode("short message is not set".to_string()))?;
        let full_message = self
            .full_message
            .as_deref()
            .ok_or_else(|| Error::Encode("full message is not set".to_string()))?;

        let host = self
            .record
            .get("host")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .or_else(|| self.source_host.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let mut gelf = Map::new();
        gelf.insert("version".into(), GELF_VERSION.into());
        gelf.insert("host".into(), host.into());
        gelf.insert("short_message".into(), short_message.into());
        gelf.insert("full_message".into(), full_message.into());
        gelf.insert("timestamp".into(), timestamp_value(self.timestamp()));
        gelf.insert("level".into(), level.as_syslog_severity().into());

        for (key, value) in &self.record {
            if STANDARD_KEYS.contains(&key.as_str()) {
                continue;
            }
            flatten_into(&mut gelf, key, value);
        }

        Ok(Value::Object(gelf))
    }

    /// Serialize to the bytes written on the wire
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_gelf()?)?)
    }

    fn timestamp(&self) -> f64 {
        self.record
            .get("request_timestamp")
            .and_then(Value::as_f64)
            .filter(|ts| *ts > 0.0)
            .unwrap_or_else(now_seconds)
    }
}

/// Current time in fractional epoch seconds
pub(crate) fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn timestamp_value(seconds: f64) -> Value {
    Number::from_f64(seconds)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Write `value` as one or more `_`-prefixed additional fields
fn flatten_into(gelf: &mut Map<String, Value>, name: &str, value: &Value) {
    if name == RESERVED_KEY || !is_valid_field_name(name) {
        return;
    }

    match value {
        Value::Null => {}
        Value::Object(children) => {
            for (child, child_value) in children {
                flatten_into(gelf, &format!("{}_{}", name, child), child_value);
            }
        }
        Value::Array(items) => {
            let scalars: Option<Vec<String>> = items.iter().map(scalar_text).collect();
            let text = match scalars {
                Some(parts) => parts.join(", "),
                None => value.to_string(),
            };
            gelf.insert(format!("_{}", name), Value::String(text));
        }
        Value::Bool(b) => {
            gelf.insert(format!("_{}", name), Value::String(b.to_string()));
        }
        Value::String(_) | Value::Number(_) => {
            gelf.insert(format!("_{}", name), value.clone());
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn complete(record_value: Value) -> GelfMessage {
        let mut message = GelfMessage::from_record(record(record_value));
        message
            .set_level(AuditLevel::Info)
            .set_short_message("GET /api/v2/system")
            .set_full_message("Audit | 10.0.0.1 | 1700000000.5");
        message
    }

    #[test]
    fn test_requires_level_and_messages() {
        let mut message = GelfMessage::from_record(Map::new());
        assert!(matches!(message.encode(), Err(Error::Encode(_))));

        message.set_level(AuditLevel::Info);
        assert!(matches!(message.encode(), Err(Error::Encode(_))));

        message.set_short_message("   ");
        assert!(matches!(message.encode(), Err(Error::Encode(_))));

        message.set_short_message("GET /");
        assert!(matches!(message.encode(), Err(Error::Encode(_))));

        message.set_full_message("Audit |  | 0");
        assert!(message.encode().is_ok());
    }

    #[test]
    fn test_standard_fields() {
        let gelf = complete(json!({
            "host": "tenant.example.com",
            "request_timestamp": 1_700_000_000.5,
        }))
        .to_gelf()
        .unwrap();

        assert_eq!(gelf["version"], "1.1");
        assert_eq!(gelf["host"], "tenant.example.com");
        assert_eq!(gelf["short_message"], "GET /api/v2/system");
        assert_eq!(gelf["full_message"], "Audit | 10.0.0.1 | 1700000000.5");
        assert_eq!(gelf["timestamp"], json!(1_700_000_000.5));
        assert_eq!(gelf["level"], 6);
        assert!(gelf.get("_host").is_none());
    }

    #[test]
    fn test_host_and_timestamp_fallbacks() {
        let gelf = complete(json!({ "host": null, "request_timestamp": 0.0 }))
            .with_source_host("app-01")
            .to_gelf()
            .unwrap();

        assert_eq!(gelf["host"], "app-01");
        assert!(gelf["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
    }

    #[test]
    fn test_additional_fields_are_flattened() {
        let gelf = complete(json!({
            "facility": "fabric-instance",
            "content_length": 0,
            "source_ip": ["10.0.0.2", "203.0.113.7"],
            "dfe": { "instance_id": "inst-42", "cluster_id": "c1", "db_server_id": null },
            "user": { "user": "alice", "roles": [{ "id": 1 }] },
            "query": {},
            "token": null,
            "secure": true,
        }))
        .to_gelf()
        .unwrap();

        assert_eq!(gelf["_facility"], "fabric-instance");
        assert_eq!(gelf["_content_length"], 0);
        assert_eq!(gelf["_source_ip"], "10.0.0.2, 203.0.113.7");
        assert_eq!(gelf["_dfe_instance_id"], "inst-42");
        assert_eq!(gelf["_dfe_cluster_id"], "c1");
        assert!(gelf.get("_dfe_db_server_id").is_none());
        assert_eq!(gelf["_user_user"], "alice");
        assert_eq!(gelf["_user_roles"], r#"[{"id":1}]"#);
        assert!(gelf.get("_token").is_none());
        assert_eq!(gelf["_secure"], "true");
    }

    #[test]
    fn test_reserved_and_invalid_names_skipped() {
        let gelf = complete(json!({
            "id": "collector-owned",
            "bad key": "x",
            "ok.key-1": "y",
        }))
        .to_gelf()
        .unwrap();

        assert!(gelf.get("_id").is_none());
        assert!(gelf.get("_bad key").is_none());
        assert_eq!(gelf["_ok.key-1"], "y");
    }
}
