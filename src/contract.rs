//! Frozen schema-version constants and the version gate.
//!
//! The gate is deliberately thin: it decides whether a raw JSON value
//! declares the expected schema generation and nothing else. Field-level
//! validation lives in `validate`, with a separate error channel (check
//! results, not errors), so callers can distinguish "wrong generation
//! entirely" from "right generation with a bug".

use crate::schema::{CanonLock, CheckId, JsonMap, VersionedStory};
use serde_json::Value;
use std::fmt;

pub const METADATA_VERSION: &str = "1.2";
pub const METADATA_VERSION_V13: &str = "1.3";
pub const LOCK_VERSION: &str = "canon.lock.v2";
pub const REPORT_VERSION: &str = "check.v2";
pub const REPORT_VERSION_V3: &str = "check.v3";

/// The seven v1.2 checks, in report order. Frozen.
pub const CHECK_IDS: [CheckId; 7] = [
    CheckId::MetadataSchemaValid,
    CheckId::CharactersValid,
    CheckId::LocationsValid,
    CheckId::TimelineConsistent,
    CheckId::ContinuityValid,
    CheckId::CanonVersionMatch,
    CheckId::ContributorValid,
];

/// The eight v1.3 checks: the v1.2 seven plus `derived_from_valid`. Frozen.
pub const CHECK_IDS_V13: [CheckId; 8] = [
    CheckId::MetadataSchemaValid,
    CheckId::CharactersValid,
    CheckId::LocationsValid,
    CheckId::TimelineConsistent,
    CheckId::ContinuityValid,
    CheckId::CanonVersionMatch,
    CheckId::ContributorValid,
    CheckId::DerivedFromValid,
];

/// A document declared an unexpected or missing schema version.
///
/// `actual` is the raw value found at the version field, or `None` when the
/// input was not an object or had no such field. Callers branch on
/// `actual_str() == Some("1.3")` to offer the schema-upgrade hint.
#[derive(Debug, Clone)]
pub struct SchemaVersionError {
    pub expected: String,
    pub actual: Option<Value>,
}

impl SchemaVersionError {
    fn new(expected: &str, actual: Option<Value>) -> Self {
        SchemaVersionError {
            expected: expected.to_string(),
            actual,
        }
    }

    pub fn actual_str(&self) -> Option<&str> {
        self.actual.as_ref().and_then(Value::as_str)
    }
}

impl fmt::Display for SchemaVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(value) => write!(
                f,
                "Expected schema version \"{}\", got {}",
                self.expected, value
            ),
            None => write!(f, "Expected schema version \"{}\", got none", self.expected),
        }
    }
}

impl std::error::Error for SchemaVersionError {}

fn gate(raw: &Value, field: &str, expected: &str) -> Result<JsonMap, SchemaVersionError> {
    let Some(obj) = raw.as_object() else {
        return Err(SchemaVersionError::new(expected, None));
    };
    match obj.get(field) {
        Some(Value::String(found)) if found == expected => Ok(obj.clone()),
        found => Err(SchemaVersionError::new(expected, found.cloned())),
    }
}

/// Accept a raw document iff it declares `schema_version: "1.2"`. The object
/// is returned unchanged; no field is inspected beyond the version.
pub fn parse_metadata(raw: &Value) -> Result<JsonMap, SchemaVersionError> {
    gate(raw, "schema_version", METADATA_VERSION)
}

/// Accept a raw document iff it declares `schema_version: "1.3"`.
pub fn parse_metadata_v1_3(raw: &Value) -> Result<JsonMap, SchemaVersionError> {
    gate(raw, "schema_version", METADATA_VERSION_V13)
}

/// Route a raw document to whichever supported generation it declares.
pub fn parse_metadata_any(raw: &Value) -> Result<VersionedStory, SchemaVersionError> {
    let disjunction = format!("{METADATA_VERSION} or {METADATA_VERSION_V13}");
    let Some(obj) = raw.as_object() else {
        return Err(SchemaVersionError::new(&disjunction, None));
    };
    match obj.get("schema_version") {
        Some(Value::String(found)) if found == METADATA_VERSION => {
            Ok(VersionedStory::V12(obj.clone()))
        }
        Some(Value::String(found)) if found == METADATA_VERSION_V13 => {
            Ok(VersionedStory::V13(obj.clone()))
        }
        found => Err(SchemaVersionError::new(&disjunction, found.cloned())),
    }
}

/// Gate and deserialize the lock document.
pub fn parse_canon_lock(raw: &Value) -> anyhow::Result<CanonLock> {
    let obj = gate(raw, "schema_version", LOCK_VERSION)?;
    let lock = serde_json::from_value(Value::Object(obj))?;
    Ok(lock)
}

/// Check that a report document declares `schemaVersion: "check.v2"`.
/// Reports spell the version field in camelCase; documents in snake_case.
pub fn assert_report_version(raw: &Value) -> Result<(), SchemaVersionError> {
    gate(raw, "schemaVersion", REPORT_VERSION).map(|_| ())
}

/// Check that a report document declares `schemaVersion: "check.v3"`.
pub fn assert_report_version_v3(raw: &Value) -> Result<(), SchemaVersionError> {
    gate(raw, "schemaVersion", REPORT_VERSION_V3).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_meta() -> Value {
        json!({
            "schema_version": "1.2",
            "canon_ref": "abc",
            "id": "ep01",
            "episode": 1,
            "title": {"ko": "t", "en": "t"},
            "timeline": "2025-01-01",
            "synopsis": {"ko": "s", "en": "s"},
            "characters": [],
            "locations": [],
            "contributor": "tester",
            "canon_status": "canonical",
        })
    }

    fn valid_v13_meta() -> Value {
        json!({
            "schema_version": "1.3",
            "canon_ref": "abc",
            "id": "ep01",
            "episode": 1,
            "lang": "ko",
            "title": "테스트",
            "timeline": "2025-01-01",
            "synopsis": "시놉시스",
            "characters": [],
            "locations": [],
            "contributor": "tester",
            "canon_status": "canonical",
        })
    }

    #[test]
    fn check_id_lists_are_frozen() {
        let ids: Vec<&str> = CHECK_IDS.iter().map(|id| id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "metadata_schema_valid",
                "characters_valid",
                "locations_valid",
                "timeline_consistent",
                "continuity_valid",
                "canon_version_match",
                "contributor_valid",
            ]
        );
        assert_eq!(CHECK_IDS_V13.len(), 8);
        assert_eq!(CHECK_IDS_V13[..7], CHECK_IDS);
        assert_eq!(CHECK_IDS_V13[7].as_str(), "derived_from_valid");
    }

    #[test]
    fn parse_metadata_accepts_declared_v12() {
        let raw = parse_metadata(&valid_meta()).expect("valid v1.2 metadata");
        assert_eq!(raw.get("schema_version"), Some(&json!("1.2")));
    }

    #[test]
    fn parse_metadata_rejects_other_versions() {
        let mut doc = valid_meta();
        doc["schema_version"] = json!("1.0");
        let err = parse_metadata(&doc).expect_err("version 1.0 must be rejected");
        assert_eq!(err.expected, "1.2");
        assert_eq!(err.actual_str(), Some("1.0"));
    }

    #[test]
    fn parse_metadata_rejects_v13() {
        let err = parse_metadata(&json!({"schema_version": "1.3", "id": "ep01"}))
            .expect_err("v1.3 must be rejected on the frozen path");
        assert_eq!(err.expected, "1.2");
        assert_eq!(err.actual_str(), Some("1.3"));
    }

    #[test]
    fn parse_metadata_rejects_missing_version_and_non_objects() {
        let err = parse_metadata(&json!({"id": "ep01"})).expect_err("missing version");
        assert!(err.actual.is_none());

        for bad in [json!(null), json!("string"), json!([1, 2])] {
            let err = parse_metadata(&bad).expect_err("non-object input");
            assert!(err.actual.is_none());
        }
    }

    #[test]
    fn parse_metadata_is_a_gate_not_a_field_validator() {
        let raw = parse_metadata(&json!({"schema_version": "1.2"}))
            .expect("version-only object passes the gate");
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn parse_metadata_v1_3_gates_on_its_own_version() {
        parse_metadata_v1_3(&valid_v13_meta()).expect("valid v1.3 metadata");

        let mut doc = valid_v13_meta();
        doc["schema_version"] = json!("1.2");
        let err = parse_metadata_v1_3(&doc).expect_err("v1.2 must be rejected");
        assert_eq!(err.expected, "1.3");
        assert_eq!(err.actual_str(), Some("1.2"));

        assert!(parse_metadata_v1_3(&json!(null)).is_err());
        assert!(parse_metadata_v1_3(&json!("string")).is_err());
    }

    #[test]
    fn parse_metadata_any_routes_by_declared_version() {
        match parse_metadata_any(&valid_meta()).expect("v1.2 routes") {
            VersionedStory::V12(raw) => assert_eq!(raw.get("schema_version"), Some(&json!("1.2"))),
            VersionedStory::V13(_) => panic!("v1.2 document routed to v1.3"),
        }
        match parse_metadata_any(&valid_v13_meta()).expect("v1.3 routes") {
            VersionedStory::V13(raw) => assert_eq!(raw.get("lang"), Some(&json!("ko"))),
            VersionedStory::V12(_) => panic!("v1.3 document routed to v1.2"),
        }
    }

    #[test]
    fn parse_metadata_any_rejects_unsupported_versions() {
        let err = parse_metadata_any(&json!({"schema_version": "2.0"}))
            .expect_err("version 2.0 is unsupported");
        assert!(err.expected.contains("1.2"));
        assert!(err.expected.contains("1.3"));
        assert_eq!(err.actual_str(), Some("2.0"));

        assert!(parse_metadata_any(&json!(null)).is_err());
    }

    #[test]
    fn parse_canon_lock_gates_and_deserializes() {
        let lock = parse_canon_lock(&json!({
            "schema_version": "canon.lock.v2",
            "canon_commit": "abc123",
            "worldbuilding_hash": "def456",
            "hash_algo": "sha256",
            "generated_at": "2025-01-01T00:00:00.000Z",
            "contributors": ["alice"],
        }))
        .expect("valid lock");
        assert_eq!(lock.canon_commit, "abc123");
        assert_eq!(lock.contributors, ["alice"]);
    }

    #[test]
    fn parse_canon_lock_rejects_v1_and_non_objects() {
        let err = parse_canon_lock(&json!({"schema_version": "canon.lock.v1", "canon_commit": "x"}))
            .expect_err("v1 lock rejected");
        let sve = err
            .downcast_ref::<SchemaVersionError>()
            .expect("schema version error");
        assert_eq!(sve.expected, "canon.lock.v2");
        assert_eq!(sve.actual_str(), Some("canon.lock.v1"));

        assert!(parse_canon_lock(&json!(42)).is_err());
        assert!(parse_canon_lock(&json!([1])).is_err());
        assert!(parse_canon_lock(&json!({})).is_err());
    }

    #[test]
    fn report_version_gates_use_camel_case_field() {
        assert_report_version(&json!({"schemaVersion": "check.v2"})).expect("check.v2 accepted");
        assert_report_version_v3(&json!({"schemaVersion": "check.v3"})).expect("check.v3 accepted");

        let err = assert_report_version(&json!({"schemaVersion": "check.v1"}))
            .expect_err("check.v1 rejected");
        assert_eq!(err.expected, "check.v2");
        assert_eq!(err.actual_str(), Some("check.v1"));

        let err = assert_report_version_v3(&json!({"schemaVersion": "check.v2"}))
            .expect_err("check.v2 rejected on v3 gate");
        assert_eq!(err.expected, "check.v3");

        // The report gate keys off schemaVersion, not schema_version.
        assert!(assert_report_version(&json!({"schema_version": "check.v2"})).is_err());
        assert!(assert_report_version(&json!({})).is_err());
        assert!(assert_report_version_v3(&json!(null)).is_err());
    }

    #[test]
    fn schema_version_error_message_names_both_sides() {
        let err = SchemaVersionError::new("1.2", Some(json!("1.0")));
        assert!(err.to_string().contains("1.2"));
        assert!(err.to_string().contains("1.0"));

        let err = SchemaVersionError::new("canon.lock.v2", None);
        assert!(err.to_string().contains("canon.lock.v2"));
        assert!(err.to_string().contains("none"));
    }
}
