//! Repo adapters: build an I/O-free repo model from a local filesystem tree
//! or from pre-fetched GitHub tree data.
//!
//! Adapters only gather raw JSON and directory listings; the contract layer
//! decides whether each document is admissible. No adapter performs network
//! I/O, and the GitHub variant performs no I/O at all.

use crate::contract::{parse_canon_lock, parse_metadata, parse_metadata_any};
use crate::schema::{
    CanonLock, GitHubRepoInput, JsonMap, RepoModel, RepoModelAny, TreeEntryType, VersionedStory,
};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Directory entries that never name a canon entity.
const INDEX_ENTRY: &str = "index";

fn list_subdirs(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// Canon entity ids come from either a directory per entity or a
/// `<id>.json` file per entity; an entry named `index` is never an entity.
fn list_canon_entries(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        let raw_name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let name = if is_dir {
            raw_name
        } else {
            raw_name
                .strip_suffix(".json")
                .map(str::to_string)
                .unwrap_or(raw_name)
        };
        if name != INDEX_ENTRY {
            names.insert(name);
        }
    }
    Ok(names)
}

fn read_json_file(path: &Path) -> Result<Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

fn read_canon_lock(repo_root: &Path) -> Result<Option<CanonLock>> {
    let lock_path = repo_root.join("canon.lock.json");
    if !lock_path.is_file() {
        return Ok(None);
    }
    let raw = read_json_file(&lock_path)?;
    let lock = parse_canon_lock(&raw).context("read canon.lock.json")?;
    Ok(Some(lock))
}

fn read_story_value(repo_root: &Path, slug: &str) -> Result<Option<Value>> {
    let meta_path = repo_root.join("stories").join(slug).join("metadata.json");
    if !meta_path.is_file() {
        return Ok(None);
    }
    read_json_file(&meta_path).map(Some)
}

struct RepoScan {
    canon_lock: Option<CanonLock>,
    characters: BTreeSet<String>,
    locations: BTreeSet<String>,
    episodes: BTreeSet<String>,
    story_values: BTreeMap<String, Value>,
}

fn scan_repo(repo_root: &Path) -> Result<RepoScan> {
    let canon_lock = read_canon_lock(repo_root)?;
    let characters = list_canon_entries(&repo_root.join("canon").join("characters"))?;
    let locations =
        list_canon_entries(&repo_root.join("canon").join("worldbuilding").join("locations"))?;
    let episodes = list_subdirs(&repo_root.join("stories"))?;

    let mut story_values = BTreeMap::new();
    for slug in &episodes {
        if let Some(value) = read_story_value(repo_root, slug)? {
            story_values.insert(slug.clone(), value);
        }
    }
    tracing::debug!(
        characters = characters.len(),
        locations = locations.len(),
        episodes = episodes.len(),
        "scanned repo"
    );
    Ok(RepoScan {
        canon_lock,
        characters,
        locations,
        episodes,
        story_values,
    })
}

/// Load a local repo into a v1.2-only [`RepoModel`]. A story declaring any
/// other schema generation aborts the load with a `SchemaVersionError`.
pub fn load_repo_from_fs(repo_root: &Path) -> Result<RepoModel> {
    let scan = scan_repo(repo_root)?;
    let mut stories = BTreeMap::new();
    for (slug, value) in &scan.story_values {
        let raw = parse_metadata(value)
            .with_context(|| format!("read stories/{slug}/metadata.json"))?;
        stories.insert(slug.clone(), raw);
    }
    Ok(RepoModel {
        canon_lock: scan.canon_lock,
        characters: scan.characters,
        locations: scan.locations,
        episodes: scan.episodes,
        stories,
    })
}

/// Load a local repo accepting both metadata generations per story.
pub fn load_repo_from_fs_any(repo_root: &Path) -> Result<RepoModelAny> {
    let scan = scan_repo(repo_root)?;
    let mut stories = BTreeMap::new();
    for (slug, value) in &scan.story_values {
        let story = parse_metadata_any(value)
            .with_context(|| format!("read stories/{slug}/metadata.json"))?;
        stories.insert(slug.clone(), story);
    }
    Ok(RepoModelAny {
        canon_lock: scan.canon_lock,
        characters: scan.characters,
        locations: scan.locations,
        episodes: scan.episodes,
        stories,
    })
}

fn entity_from_path(path: &str, prefix: &str, entry_type: TreeEntryType) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    let name = match entry_type {
        TreeEntryType::Tree => rest.to_string(),
        TreeEntryType::Blob => rest.strip_suffix(".json").unwrap_or(rest).to_string(),
    };
    (name != INDEX_ENTRY).then_some(name)
}

struct TreeScan {
    canon_lock: Option<CanonLock>,
    characters: BTreeSet<String>,
    locations: BTreeSet<String>,
    episodes: BTreeSet<String>,
}

fn scan_tree(input: &GitHubRepoInput) -> Result<TreeScan> {
    let canon_lock = match input.files.get("canon.lock.json") {
        Some(content) => {
            let raw: Value =
                serde_json::from_str(content).context("parse canon.lock.json")?;
            Some(parse_canon_lock(&raw).context("read canon.lock.json")?)
        }
        None => None,
    };

    let mut characters = BTreeSet::new();
    let mut locations = BTreeSet::new();
    let mut episodes = BTreeSet::new();
    for entry in &input.tree {
        if let Some(name) = entity_from_path(&entry.path, "canon/characters/", entry.entry_type) {
            characters.insert(name);
        }
        if let Some(name) = entity_from_path(
            &entry.path,
            "canon/worldbuilding/locations/",
            entry.entry_type,
        ) {
            locations.insert(name);
        }
        if entry.entry_type == TreeEntryType::Tree {
            if let Some(slug) = entry.path.strip_prefix("stories/") {
                if !slug.is_empty() && !slug.contains('/') {
                    episodes.insert(slug.to_string());
                }
            }
        }
    }
    Ok(TreeScan {
        canon_lock,
        characters,
        locations,
        episodes,
    })
}

fn tree_story_value(input: &GitHubRepoInput, slug: &str) -> Result<Option<Value>> {
    let path = format!("stories/{slug}/metadata.json");
    match input.files.get(&path) {
        Some(content) => {
            let value = serde_json::from_str(content).with_context(|| format!("parse {path}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Build a v1.2 [`RepoModel`] from pre-fetched GitHub tree data.
pub fn build_repo_model(input: &GitHubRepoInput) -> Result<RepoModel> {
    let scan = scan_tree(input)?;
    let mut stories: BTreeMap<String, JsonMap> = BTreeMap::new();
    for slug in &scan.episodes {
        if let Some(value) = tree_story_value(input, slug)? {
            let raw = parse_metadata(&value)
                .with_context(|| format!("read stories/{slug}/metadata.json"))?;
            stories.insert(slug.clone(), raw);
        }
    }
    Ok(RepoModel {
        canon_lock: scan.canon_lock,
        characters: scan.characters,
        locations: scan.locations,
        episodes: scan.episodes,
        stories,
    })
}

/// Build a mixed-generation [`RepoModelAny`] from pre-fetched GitHub data.
pub fn build_repo_model_any(input: &GitHubRepoInput) -> Result<RepoModelAny> {
    let scan = scan_tree(input)?;
    let mut stories: BTreeMap<String, VersionedStory> = BTreeMap::new();
    for slug in &scan.episodes {
        if let Some(value) = tree_story_value(input, slug)? {
            let story = parse_metadata_any(&value)
                .with_context(|| format!("read stories/{slug}/metadata.json"))?;
            stories.insert(slug.clone(), story);
        }
    }
    Ok(RepoModelAny {
        canon_lock: scan.canon_lock,
        characters: scan.characters,
        locations: scan.locations,
        episodes: scan.episodes,
        stories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SchemaVersionError;
    use crate::schema::GitHubTreeEntry;
    use serde_json::json;
    use std::fs;

    fn entry(path: &str, entry_type: TreeEntryType) -> GitHubTreeEntry {
        GitHubTreeEntry {
            path: path.to_string(),
            entry_type,
            sha: "0000".to_string(),
        }
    }

    fn v12_story(id: &str) -> String {
        json!({
            "schema_version": "1.2",
            "canon_ref": "abc",
            "id": id,
            "episode": 1,
            "title": {"ko": "t", "en": "t"},
            "timeline": "2025-01-01",
            "synopsis": {"ko": "s", "en": "s"},
            "characters": ["alice", "bob"],
            "locations": [],
            "contributor": "testuser",
            "canon_status": "canonical",
        })
        .to_string()
    }

    // ── filesystem adapter ──

    #[test]
    fn fs_adapter_reads_both_entity_layouts_and_skips_index() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("canon/characters/bob")).expect("mkdir");
        fs::create_dir_all(root.join("canon/worldbuilding/locations")).expect("mkdir");
        fs::create_dir_all(root.join("stories")).expect("mkdir");
        fs::write(root.join("canon/characters/alice.json"), "{}").expect("write");
        fs::write(root.join("canon/characters/index.json"), "{}").expect("write");
        fs::write(root.join("canon/worldbuilding/locations/seoul.json"), "{}").expect("write");

        let model = load_repo_from_fs(root).expect("load");
        assert!(model.characters.contains("alice"));
        assert!(model.characters.contains("bob"));
        assert!(!model.characters.contains("index"));
        assert!(model.locations.contains("seoul"));
        assert!(model.canon_lock.is_none());
        assert!(model.stories.is_empty());
    }

    #[test]
    fn fs_adapter_collects_episodes_and_stories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("stories/ep01")).expect("mkdir");
        fs::create_dir_all(root.join("stories/ep02")).expect("mkdir");
        fs::write(root.join("stories/ep01/metadata.json"), v12_story("ep01")).expect("write");
        // ep02 has no metadata.json: still an episode, not a story.

        let model = load_repo_from_fs(root).expect("load");
        assert_eq!(model.episodes.len(), 2);
        assert_eq!(model.stories.len(), 1);
        assert!(model.stories.contains_key("ep01"));
    }

    #[test]
    fn fs_adapter_rejects_v1_lock() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("stories")).expect("mkdir");
        fs::write(
            root.join("canon.lock.json"),
            json!({"schema_version": "canon.lock.v1", "canon_commit": "old"}).to_string(),
        )
        .expect("write");

        let err = load_repo_from_fs(root).expect_err("v1 lock must be rejected");
        let sve = err
            .downcast_ref::<SchemaVersionError>()
            .expect("schema version error survives context");
        assert_eq!(sve.expected, "canon.lock.v2");
    }

    #[test]
    fn fs_adapter_surfaces_v13_metadata_on_frozen_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("stories/ep01")).expect("mkdir");
        fs::write(
            root.join("stories/ep01/metadata.json"),
            json!({"schema_version": "1.3", "id": "ep01"}).to_string(),
        )
        .expect("write");

        let err = load_repo_from_fs(root).expect_err("v1.3 on frozen path");
        let sve = err
            .downcast_ref::<SchemaVersionError>()
            .expect("schema version error");
        assert_eq!(sve.actual_str(), Some("1.3"));

        // The version-agnostic loader accepts the same repo at the gate.
        let model = load_repo_from_fs_any(root).expect("any loader");
        assert!(matches!(
            model.stories.get("ep01"),
            Some(VersionedStory::V13(_))
        ));
    }

    // ── github adapter ──

    #[test]
    fn github_adapter_derives_sets_from_tree_paths() {
        let input = GitHubRepoInput {
            tree: vec![
                entry("canon/characters/alice.json", TreeEntryType::Blob),
                entry("canon/characters/bob", TreeEntryType::Tree),
                entry("canon/characters/index.json", TreeEntryType::Blob),
                entry("canon/characters/bob/definition.json", TreeEntryType::Blob),
                entry("canon/worldbuilding/locations/seoul.json", TreeEntryType::Blob),
                entry("stories/ep01", TreeEntryType::Tree),
                entry("stories/ep01/metadata.json", TreeEntryType::Blob),
            ],
            files: [(
                "stories/ep01/metadata.json".to_string(),
                v12_story("ep01"),
            )]
            .into_iter()
            .collect(),
        };

        let model = build_repo_model(&input).expect("build");
        assert!(model.characters.contains("alice"), "blob entity");
        assert!(model.characters.contains("bob"), "tree entity");
        assert!(!model.characters.contains("index"));
        assert!(model.locations.contains("seoul"));
        assert_eq!(model.episodes.len(), 1);
        assert!(model.stories.contains_key("ep01"));
    }

    #[test]
    fn github_adapter_rejects_unsupported_metadata_version() {
        let input = GitHubRepoInput {
            tree: vec![entry("stories/ep01", TreeEntryType::Tree)],
            files: [(
                "stories/ep01/metadata.json".to_string(),
                json!({"schema_version": "2.0", "id": "ep01"}).to_string(),
            )]
            .into_iter()
            .collect(),
        };

        let err = build_repo_model(&input).expect_err("version 2.0 rejected");
        assert!(err.downcast_ref::<SchemaVersionError>().is_some());
        assert!(build_repo_model_any(&input).is_err());
    }
}
