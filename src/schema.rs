//! Document, report, and repo-model types for canon repos.
//!
//! Persisted documents (`metadata.json`, `canon.lock.json`) use snake_case
//! field names; check reports use camelCase (`schemaVersion`, `storyId`).
//! That asymmetry is part of the on-disk contract and must not be "fixed".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Raw JSON object, as returned by the contract layer's version gate.
pub type JsonMap = serde_json::Map<String, Value>;

/// A bilingual text field as used by v1.2 story metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bilingual {
    pub ko: String,
    pub en: String,
}

/// v1.2 story metadata in its authored shape. Used when the tool writes
/// documents (scaffolding); validation runs against the raw [`JsonMap`] so
/// that malformed documents still produce itemized check failures instead of
/// deserialization errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub schema_version: String,
    pub canon_ref: String,
    pub id: String,
    pub episode: i64,
    pub title: Bilingual,
    pub timeline: String,
    pub synopsis: Bilingual,
    pub characters: Vec<String>,
    pub locations: Vec<String>,
    pub contributor: String,
    pub canon_status: String,
}

/// Character definition document (`canon/characters/<id>/definition.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterDefinition {
    pub id: String,
    pub name: Bilingual,
    pub description: Bilingual,
}

/// Location definition document (`canon/worldbuilding/locations/<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDefinition {
    pub id: String,
    pub name: Bilingual,
    pub description: Bilingual,
}

/// The content-addressed lock document at the repo root.
///
/// Fields other than `schema_version` default when absent so that a gated
/// but incomplete lock still loads; the validator then reports the mismatch
/// instead of the reader crashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonLock {
    pub schema_version: String,
    pub canon_commit: String,
    pub worldbuilding_hash: String,
    pub hash_algo: String,
    pub generated_at: String,
    pub contributors: Vec<String>,
}

impl Default for CanonLock {
    fn default() -> Self {
        CanonLock {
            schema_version: crate::contract::LOCK_VERSION.to_string(),
            canon_commit: String::new(),
            worldbuilding_hash: String::new(),
            hash_algo: "sha256".to_string(),
            generated_at: String::new(),
            contributors: Vec::new(),
        }
    }
}

/// Fixed per-check identifiers, serialized in snake_case in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    MetadataSchemaValid,
    CharactersValid,
    LocationsValid,
    TimelineConsistent,
    ContinuityValid,
    CanonVersionMatch,
    ContributorValid,
    DerivedFromValid,
}

impl CheckId {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckId::MetadataSchemaValid => "metadata_schema_valid",
            CheckId::CharactersValid => "characters_valid",
            CheckId::LocationsValid => "locations_valid",
            CheckId::TimelineConsistent => "timeline_consistent",
            CheckId::ContinuityValid => "continuity_valid",
            CheckId::CanonVersionMatch => "canon_version_match",
            CheckId::ContributorValid => "contributor_valid",
            CheckId::DerivedFromValid => "derived_from_valid",
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check. `message` is present only on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: CheckId,
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryCheckReport {
    pub story_id: String,
    pub checks: Vec<CheckResult>,
    pub all_pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// passing stories / total stories; 0.0 when the repo has no stories.
    pub score: f64,
    pub total_checks: usize,
    pub passing_checks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoCheckReport {
    pub schema_version: String,
    pub summary: ReportSummary,
    pub stories: Vec<StoryCheckReport>,
    pub total_stories: usize,
    pub passing_stories: usize,
}

/// In-memory, I/O-free snapshot of a repo with v1.2-only story metadata.
/// Built fresh per invocation by an adapter; never persisted.
#[derive(Debug, Clone, Default)]
pub struct RepoModel {
    pub canon_lock: Option<CanonLock>,
    pub characters: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub episodes: BTreeSet<String>,
    pub stories: BTreeMap<String, JsonMap>,
}

/// A story document tagged with the schema generation it declared.
///
/// Closed union: exactly two generations exist, and the dispatcher in the
/// contract layer is the only place that assigns the tag.
#[derive(Debug, Clone)]
pub enum VersionedStory {
    V12(JsonMap),
    V13(JsonMap),
}

/// Like [`RepoModel`] but allowing v1.2 and v1.3 stories to coexist.
#[derive(Debug, Clone, Default)]
pub struct RepoModelAny {
    pub canon_lock: Option<CanonLock>,
    pub characters: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub episodes: BTreeSet<String>,
    pub stories: BTreeMap<String, VersionedStory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeEntryType {
    Blob,
    Tree,
}

/// One entry of a pre-parsed GitHub Trees API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubTreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: TreeEntryType,
    pub sha: String,
}

/// Input for the GitHub adapter: a tree listing plus pre-fetched file
/// contents. The adapter itself performs no network I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepoInput {
    pub tree: Vec<GitHubTreeEntry>,
    pub files: BTreeMap<String, String>,
}
