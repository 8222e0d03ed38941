//! Content-addressed canon lock engine.
//!
//! The worldbuilding hash is a pure function of the `canon/` tree: file
//! paths are normalized to forward slashes relative to `canon/` and sorted
//! before hashing, so the digest is stable across operating systems and
//! traversal orders. Each file contributes `path NUL bytes NUL` to a single
//! SHA-256 stream; the NUL framing keeps path/content concatenations
//! unambiguous.

use crate::contract::LOCK_VERSION;
use crate::repo::load_repo_from_fs_any;
use crate::schema::{CanonLock, CheckId, VersionedStory};
use crate::validate::{failing_stories, validate_repo_any};
use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const LOCK_FILE: &str = "canon.lock.json";

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        let path = entry.path();
        if entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?
            .is_dir()
        {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_slash_path(canon_dir: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(canon_dir)
        .with_context(|| format!("relativize {}", path.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Hash every file under `canon/` into one hex SHA-256 digest. Any change
/// to any file, a rename, or an added/removed file changes the digest.
pub fn hash_canon_tree(canon_dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    if canon_dir.is_dir() {
        collect_files(canon_dir, &mut files)?;
    }
    let mut rel_paths = files
        .iter()
        .map(|path| relative_slash_path(canon_dir, path).map(|rel| (rel, path.clone())))
        .collect::<Result<Vec<_>>>()?;
    rel_paths.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel, path) in &rel_paths {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Resolve the commit the lock will reference. A repo without a resolvable
/// HEAD cannot be locked; there is no lockless fallback.
pub fn resolve_head_commit(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("run git rev-parse HEAD")?;
    if !output.status.success() {
        bail!("git rev-parse HEAD failed; canon.lock.json requires a commit ref");
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if commit.is_empty() {
        bail!("git rev-parse HEAD produced no commit; canon.lock.json requires a commit ref");
    }
    Ok(commit)
}

/// Merge the previous lock's contributor ledger with the contributors of the
/// current stories. Append-only: every previous entry survives, even when no
/// current story references it. Result is sorted and de-duplicated.
pub fn merge_contributors<'a, I>(previous: Option<&CanonLock>, current: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut merged: std::collections::BTreeSet<String> = previous
        .map(|lock| lock.contributors.iter().cloned().collect())
        .unwrap_or_default();
    for contributor in current {
        if !contributor.is_empty() {
            merged.insert(contributor.to_string());
        }
    }
    merged.into_iter().collect()
}

fn story_contributors(stories: &std::collections::BTreeMap<String, VersionedStory>) -> Vec<&str> {
    stories
        .values()
        .map(|story| match story {
            VersionedStory::V12(raw) | VersionedStory::V13(raw) => raw,
        })
        .filter_map(|raw| raw.get("contributor").and_then(serde_json::Value::as_str))
        .collect()
}

/// Regenerate `canon.lock.json` for the repo at `repo_root`.
///
/// Unless this is a genesis lock, full compliance is required first;
/// `update_refs` relaxes only the `canon_version_match` check (the ref is
/// about to be rewritten) and additionally rewrites every story's
/// `canon_ref` to the new commit after the lock is written.
pub fn regenerate(repo_root: &Path, update_refs: bool) -> Result<CanonLock> {
    let canon_dir = repo_root.join("canon");
    if !canon_dir.is_dir() {
        bail!("canon/ directory not found");
    }

    let model = load_repo_from_fs_any(repo_root).context("failed to read repo")?;
    let is_genesis = model.canon_lock.is_none();
    if !is_genesis {
        let report = validate_repo_any(&model);
        let ignored: &[CheckId] = if update_refs {
            &[CheckId::CanonVersionMatch]
        } else {
            &[]
        };
        let failing = failing_stories(&report, ignored);
        if !failing.is_empty() {
            let mut msg = String::from("compliance check failed, lock refused:");
            for (story, ids) in &failing {
                let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
                let _ = write!(msg, "\n  {story}: {}", ids.join(", "));
            }
            bail!(msg);
        }
    } else {
        tracing::info!("no existing lock; generating genesis lock");
    }

    let canon_commit = resolve_head_commit(repo_root)?;
    let worldbuilding_hash = hash_canon_tree(&canon_dir)?;
    let contributors = merge_contributors(
        model.canon_lock.as_ref(),
        story_contributors(&model.stories),
    );

    let lock = CanonLock {
        schema_version: LOCK_VERSION.to_string(),
        canon_commit,
        worldbuilding_hash,
        hash_algo: "sha256".to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        contributors,
    };

    let json = serde_json::to_string_pretty(&lock).context("serialize lock")?;
    fs::write(repo_root.join(LOCK_FILE), json + "\n").context("write canon.lock.json")?;
    tracing::info!(commit = %lock.canon_commit, "lock regenerated");

    if update_refs {
        rewrite_story_refs(repo_root, &lock.canon_commit)?;
    }
    Ok(lock)
}

/// Point every story's `canon_ref` at `commit`. Batch mutation performed
/// after locking; deliberately outside the hash computation.
fn rewrite_story_refs(repo_root: &Path, commit: &str) -> Result<usize> {
    let stories_dir = repo_root.join("stories");
    let mut rewritten = 0;
    if !stories_dir.is_dir() {
        return Ok(rewritten);
    }
    for entry in fs::read_dir(&stories_dir).context("list stories/")? {
        let entry = entry.context("list stories/")?;
        let meta_path = entry.path().join("metadata.json");
        if !meta_path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))?;
        let mut value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("parse {}", meta_path.display()))?;
        let Some(obj) = value.as_object_mut() else {
            continue;
        };
        obj.insert(
            "canon_ref".to_string(),
            serde_json::Value::String(commit.to_string()),
        );
        let json = serde_json::to_string_pretty(&value)
            .with_context(|| format!("serialize {}", meta_path.display()))?;
        fs::write(&meta_path, json + "\n")
            .with_context(|| format!("write {}", meta_path.display()))?;
        rewritten += 1;
    }
    tracing::info!(rewritten, "updated story canon_refs");
    Ok(rewritten)
}
