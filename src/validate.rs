//! Canon compliance checks.
//!
//! Every check is a pure function from story fields (plus the relevant
//! cross-reference set) to a [`CheckResult`]. Data-shape problems inside a
//! version-gated document are reported as failing checks, never as errors;
//! only the version gate and command preconditions raise.
//!
//! A story report always contains the full fixed check list for its schema
//! generation (7 for v1.2, 8 for v1.3), in frozen order. When the schema
//! check itself fails, the remaining checks are emitted as forced failures
//! instead of running against fields that may be absent.

use crate::contract::{CHECK_IDS, CHECK_IDS_V13, METADATA_VERSION, METADATA_VERSION_V13};
use crate::contract::{REPORT_VERSION, REPORT_VERSION_V3};
use crate::sanitize::{has_excessive_combining, has_prohibited_codepoints, MAX_COMBINING_RUN};
use crate::schema::{
    CanonLock, CheckId, CheckResult, JsonMap, RepoCheckReport, RepoModel, RepoModelAny,
    ReportSummary, StoryCheckReport, VersionedStory,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

const SKIPPED_INVALID_SCHEMA: &str = "skipped: metadata schema invalid";

fn pass(id: CheckId) -> CheckResult {
    CheckResult {
        id,
        pass: true,
        message: None,
    }
}

fn fail(id: CheckId, message: impl Into<String>) -> CheckResult {
    CheckResult {
        id,
        pass: false,
        message: Some(message.into()),
    }
}

/// Cross-reference sets shared by every story of one validation run.
#[derive(Debug, Clone, Copy)]
struct CrossRefs<'a> {
    characters: &'a BTreeSet<String>,
    locations: &'a BTreeSet<String>,
    episodes: &'a BTreeSet<String>,
    canon_lock: Option<&'a CanonLock>,
}

// ── field extraction ──
//
// These run only after the schema check passed, so the shapes they assume
// are already guaranteed; defaults keep them total regardless.

fn str_field<'a>(raw: &'a JsonMap, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn string_list(raw: &JsonMap, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn is_bilingual_object(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        matches!(obj.get("ko"), Some(Value::String(_)))
            && matches!(obj.get("en"), Some(Value::String(_)))
    })
}

fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

// ── per-story checks ──

/// v1.2 schema conformance: required fields, field types, bilingual
/// title/synopsis, and the slug/id agreement rule when a directory slug is
/// supplied.
pub fn check_metadata_schema(raw: &JsonMap, slug: Option<&str>) -> CheckResult {
    const REQUIRED: [&str; 11] = [
        "schema_version",
        "canon_ref",
        "id",
        "episode",
        "title",
        "timeline",
        "synopsis",
        "characters",
        "locations",
        "contributor",
        "canon_status",
    ];
    let id = CheckId::MetadataSchemaValid;

    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|field| !raw.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return fail(id, format!("Missing fields: {}", missing.join(", ")));
    }

    if raw.get("schema_version").and_then(Value::as_str) != Some(METADATA_VERSION) {
        return fail(
            id,
            format!(
                "Expected schema_version \"{METADATA_VERSION}\", got {}",
                raw["schema_version"]
            ),
        );
    }

    for field in ["canon_ref", "id", "contributor", "timeline"] {
        if !raw[field].is_string() {
            return fail(id, format!("{field} must be a string"));
        }
    }
    // serde_json numbers are always finite, so is_number covers the rule.
    if !raw["episode"].is_number() {
        return fail(id, "episode must be a finite number");
    }
    for field in ["title", "synopsis"] {
        if !is_bilingual_object(&raw[field]) {
            return fail(
                id,
                format!("{field} must be an object with ko and en string values"),
            );
        }
    }
    for field in ["characters", "locations"] {
        match raw[field].as_array() {
            None => return fail(id, format!("{field} must be an array")),
            Some(items) if !items.iter().all(Value::is_string) => {
                return fail(id, format!("{field} array must contain only strings"));
            }
            Some(_) => {}
        }
    }
    let status = str_field(raw, "canon_status");
    if !matches!(status, "canonical" | "non-canonical") {
        return fail(id, "canon_status must be \"canonical\" or \"non-canonical\"");
    }

    if let Some(slug) = slug {
        let meta_id = str_field(raw, "id");
        if meta_id != slug {
            return fail(
                id,
                format!("id \"{meta_id}\" does not match story directory \"{slug}\""),
            );
        }
    }

    pass(id)
}

/// v1.3 schema conformance: flat monolingual title/synopsis tagged by `lang`,
/// the extended canon_status set, and the Unicode hygiene gates.
pub fn check_metadata_schema_v1_3(raw: &JsonMap, slug: Option<&str>) -> CheckResult {
    const REQUIRED: [&str; 12] = [
        "schema_version",
        "canon_ref",
        "id",
        "episode",
        "lang",
        "title",
        "timeline",
        "synopsis",
        "characters",
        "locations",
        "contributor",
        "canon_status",
    ];
    let id = CheckId::MetadataSchemaValid;

    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|field| !raw.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return fail(id, format!("Missing fields: {}", missing.join(", ")));
    }

    if raw.get("schema_version").and_then(Value::as_str) != Some(METADATA_VERSION_V13) {
        return fail(
            id,
            format!(
                "Expected schema_version \"{METADATA_VERSION_V13}\", got {}",
                raw["schema_version"]
            ),
        );
    }

    for field in ["canon_ref", "id", "contributor", "timeline", "lang"] {
        if !raw[field].is_string() {
            return fail(id, format!("{field} must be a string"));
        }
    }
    // v1.3 flattened these; the bilingual v1.2 object is an explicit error.
    for field in ["title", "synopsis"] {
        if !raw[field].is_string() {
            return fail(
                id,
                format!("{field} must be a string (v1.3 uses flat monolingual fields)"),
            );
        }
    }
    if !raw["episode"].is_number() {
        return fail(id, "episode must be a finite number");
    }
    for field in ["characters", "locations"] {
        if !is_string_array(&raw[field]) {
            return fail(id, format!("{field} must be an array of strings"));
        }
    }
    let status = str_field(raw, "canon_status");
    if !matches!(status, "canonical" | "non-canonical" | "derivative") {
        return fail(
            id,
            "canon_status must be \"canonical\", \"non-canonical\", or \"derivative\"",
        );
    }

    for field in ["title", "synopsis"] {
        let text = str_field(raw, field);
        if has_excessive_combining(text, MAX_COMBINING_RUN) {
            return fail(id, format!("{field} contains excessive combining marks"));
        }
        if has_prohibited_codepoints(text) {
            return fail(id, format!("{field} contains prohibited Unicode codepoints"));
        }
    }

    if let Some(slug) = slug {
        let meta_id = str_field(raw, "id");
        if meta_id != slug {
            return fail(
                id,
                format!("id \"{meta_id}\" does not match story directory \"{slug}\""),
            );
        }
    }

    pass(id)
}

/// Every declared character must exist in the canon.
pub fn check_characters(declared: &[String], known: &BTreeSet<String>) -> CheckResult {
    let missing: Vec<&str> = declared
        .iter()
        .filter(|c| !known.contains(*c))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        pass(CheckId::CharactersValid)
    } else {
        fail(
            CheckId::CharactersValid,
            format!("Unknown characters: {}", missing.join(", ")),
        )
    }
}

/// Every declared location must exist in the canon.
pub fn check_locations(declared: &[String], known: &BTreeSet<String>) -> CheckResult {
    let missing: Vec<&str> = declared
        .iter()
        .filter(|l| !known.contains(*l))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        pass(CheckId::LocationsValid)
    } else {
        fail(
            CheckId::LocationsValid,
            format!("Unknown locations: {}", missing.join(", ")),
        )
    }
}

/// `timeline` must be a `YYYY-MM-DD` string naming a real calendar date,
/// with nothing trailing. `2025-02-30` and `2025-01-01junk` both fail.
pub fn check_timeline(timeline: &str) -> CheckResult {
    let id = CheckId::TimelineConsistent;
    let shape = Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("regex for timeline shape");
    if !shape.is_match(timeline) {
        return fail(id, format!("Invalid timeline date: \"{timeline}\""));
    }
    match chrono::NaiveDate::parse_from_str(timeline, "%Y-%m-%d") {
        Ok(_) => pass(id),
        Err(_) => fail(id, format!("Invalid timeline date: \"{timeline}\"")),
    }
}

/// `temporal_context` references must name known episodes. Absent or null
/// context passes. All violations are collected into one message.
pub fn check_continuity(temporal_context: Option<&Value>, known: &BTreeSet<String>) -> CheckResult {
    let id = CheckId::ContinuityValid;
    let Some(tc) = temporal_context else {
        return pass(id);
    };
    if tc.is_null() {
        return pass(id);
    }
    let Some(obj) = tc.as_object() else {
        return fail(id, "temporal_context must be an object");
    };

    let mut broken: Vec<String> = Vec::new();
    for key in ["prev_episode", "next_episode"] {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(slug)) => {
                if !known.contains(slug) {
                    broken.push(format!("{key} \"{slug}\" not found"));
                }
            }
            Some(_) => broken.push(format!("{key} must be a string or null")),
        }
    }
    match obj.get("thematic_echoes") {
        None | Some(Value::Null) => {}
        Some(Value::Array(echoes)) => {
            for echo in echoes {
                match echo.as_str() {
                    Some(slug) if known.contains(slug) => {}
                    Some(slug) => broken.push(format!("thematic_echo \"{slug}\" not found")),
                    None => broken.push("thematic_echoes must contain only strings".to_string()),
                }
            }
        }
        Some(_) => broken.push("thematic_echoes must be an array".to_string()),
    }

    if broken.is_empty() {
        pass(id)
    } else {
        fail(id, broken.join("; "))
    }
}

/// `canon_ref` must match the lock's commit exactly. No lock loaded at all
/// is itself a failure.
pub fn check_canon_version(canon_ref: &str, lock: Option<&CanonLock>) -> CheckResult {
    let id = CheckId::CanonVersionMatch;
    let Some(lock) = lock else {
        return fail(id, "canon.lock.json not found");
    };
    if canon_ref == lock.canon_commit {
        pass(id)
    } else {
        fail(
            id,
            format!(
                "canon_ref \"{canon_ref}\" does not match lock \"{}\"",
                lock.canon_commit
            ),
        )
    }
}

/// Contributor must be a non-empty identity handle: 1-39 chars of
/// alphanumerics, underscores, and hyphens, with no leading or trailing
/// hyphen.
pub fn check_contributor(contributor: &str) -> CheckResult {
    let id = CheckId::ContributorValid;
    let trimmed = contributor.trim();
    if trimmed.is_empty() {
        return fail(id, "contributor must be a non-empty string");
    }
    let handle = Regex::new(r"^[A-Za-z0-9_](?:[A-Za-z0-9_-]{0,37}[A-Za-z0-9_])?$")
        .expect("regex for contributor handle");
    if handle.is_match(trimmed) {
        pass(id)
    } else {
        fail(
            id,
            format!("contributor \"{trimmed}\" is not a valid identity handle"),
        )
    }
}

/// v1.3 only: `derived_from` must be set iff `canon_status` is "derivative",
/// and must then name a known episode.
pub fn check_derived_from(
    canon_status: &str,
    derived_from: Option<&str>,
    known: &BTreeSet<String>,
) -> CheckResult {
    let id = CheckId::DerivedFromValid;
    let derivative = canon_status == "derivative";
    match (derivative, derived_from) {
        (true, None) => fail(id, "canon_status \"derivative\" requires derived_from"),
        (false, Some(_)) => fail(
            id,
            "derived_from should only be set when canon_status is \"derivative\"",
        ),
        (true, Some(source)) if !known.contains(source) => fail(
            id,
            format!("derived_from \"{source}\" not found in episodes"),
        ),
        _ => pass(id),
    }
}

// ── per-story orchestration ──

fn story_report(slug: &str, raw: &JsonMap, checks: Vec<CheckResult>) -> StoryCheckReport {
    let all_pass = checks.iter().all(|c| c.pass);
    StoryCheckReport {
        story_id: raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(slug)
            .to_string(),
        checks,
        all_pass,
    }
}

fn validate_story(slug: &str, raw: &JsonMap, refs: CrossRefs<'_>) -> StoryCheckReport {
    let schema = check_metadata_schema(raw, Some(slug));
    let mut checks = Vec::with_capacity(CHECK_IDS.len());
    if schema.pass {
        checks.push(schema);
        checks.push(check_characters(
            &string_list(raw, "characters"),
            refs.characters,
        ));
        checks.push(check_locations(
            &string_list(raw, "locations"),
            refs.locations,
        ));
        checks.push(check_timeline(str_field(raw, "timeline")));
        checks.push(check_continuity(raw.get("temporal_context"), refs.episodes));
        checks.push(check_canon_version(
            str_field(raw, "canon_ref"),
            refs.canon_lock,
        ));
        checks.push(check_contributor(str_field(raw, "contributor")));
    } else {
        checks.push(schema);
        for id in CHECK_IDS.into_iter().skip(1) {
            checks.push(fail(id, SKIPPED_INVALID_SCHEMA));
        }
    }
    story_report(slug, raw, checks)
}

fn validate_story_v1_3(slug: &str, raw: &JsonMap, refs: CrossRefs<'_>) -> StoryCheckReport {
    let schema = check_metadata_schema_v1_3(raw, Some(slug));
    let mut checks = Vec::with_capacity(CHECK_IDS_V13.len());
    if schema.pass {
        checks.push(schema);
        checks.push(check_characters(
            &string_list(raw, "characters"),
            refs.characters,
        ));
        checks.push(check_locations(
            &string_list(raw, "locations"),
            refs.locations,
        ));
        checks.push(check_timeline(str_field(raw, "timeline")));
        checks.push(check_continuity(raw.get("temporal_context"), refs.episodes));
        checks.push(check_canon_version(
            str_field(raw, "canon_ref"),
            refs.canon_lock,
        ));
        checks.push(check_contributor(str_field(raw, "contributor")));
        checks.push(check_derived_from(
            str_field(raw, "canon_status"),
            raw.get("derived_from").and_then(Value::as_str),
            refs.episodes,
        ));
    } else {
        checks.push(schema);
        for id in CHECK_IDS_V13.into_iter().skip(1) {
            checks.push(fail(id, SKIPPED_INVALID_SCHEMA));
        }
    }
    story_report(slug, raw, checks)
}

// ── repo aggregation ──

fn aggregate(schema_version: &str, stories: Vec<StoryCheckReport>) -> RepoCheckReport {
    let total_stories = stories.len();
    let passing_stories = stories.iter().filter(|s| s.all_pass).count();
    let total_checks = stories.iter().map(|s| s.checks.len()).sum();
    let passing_checks = stories
        .iter()
        .map(|s| s.checks.iter().filter(|c| c.pass).count())
        .sum();
    let score = if total_stories > 0 {
        passing_stories as f64 / total_stories as f64
    } else {
        0.0
    };
    RepoCheckReport {
        schema_version: schema_version.to_string(),
        summary: ReportSummary {
            score,
            total_checks,
            passing_checks,
        },
        stories,
        total_stories,
        passing_stories,
    }
}

/// Run the seven v1.2 checks for every story in the model. Tag `check.v2`.
pub fn validate_repo(model: &RepoModel) -> RepoCheckReport {
    let refs = CrossRefs {
        characters: &model.characters,
        locations: &model.locations,
        episodes: &model.episodes,
        canon_lock: model.canon_lock.as_ref(),
    };
    let stories = model
        .stories
        .iter()
        .map(|(slug, raw)| validate_story(slug, raw, refs))
        .collect();
    aggregate(REPORT_VERSION, stories)
}

/// Route each story to its generation's check set (7 or 8 checks).
/// Tag `check.v3`.
pub fn validate_repo_any(model: &RepoModelAny) -> RepoCheckReport {
    let refs = CrossRefs {
        characters: &model.characters,
        locations: &model.locations,
        episodes: &model.episodes,
        canon_lock: model.canon_lock.as_ref(),
    };
    let stories = model
        .stories
        .iter()
        .map(|(slug, story)| match story {
            VersionedStory::V12(raw) => validate_story(slug, raw, refs),
            VersionedStory::V13(raw) => validate_story_v1_3(slug, raw, refs),
        })
        .collect();
    aggregate(REPORT_VERSION_V3, stories)
}

/// Failing check ids per story, skipping `ignored` ids. Used by the lock
/// engine's compliance gate, where an imminent ref rewrite makes
/// `canon_version_match` failures expected.
pub fn failing_stories(
    report: &RepoCheckReport,
    ignored: &[CheckId],
) -> Vec<(String, Vec<CheckId>)> {
    report
        .stories
        .iter()
        .filter_map(|story| {
            let failing: Vec<CheckId> = story
                .checks
                .iter()
                .filter(|c| !c.pass && !ignored.contains(&c.id))
                .map(|c| c.id)
                .collect();
            if failing.is_empty() {
                None
            } else {
                Some((story.story_id.clone(), failing))
            }
        })
        .collect()
}
