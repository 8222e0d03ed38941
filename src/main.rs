use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod contract;
mod lock;
mod repo;
mod sanitize;
mod schema;
mod templates;
mod validate;

use contract::{
    assert_report_version, assert_report_version_v3, SchemaVersionError, METADATA_VERSION,
    METADATA_VERSION_V13,
};
use repo::{build_repo_model, build_repo_model_any, load_repo_from_fs, load_repo_from_fs_any};
use schema::{GitHubRepoInput, RepoCheckReport};
use validate::{validate_repo, validate_repo_any};

#[derive(Parser, Debug)]
#[command(name = "canon", version, about = "Canon repo validator and lock tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate every story against canon and print a per-check report
    Check(CheckArgs),
    /// Regenerate canon.lock.json from the current canon tree and HEAD
    Lock(LockArgs),
    /// Scaffold the canon repo layout in an existing directory
    Init(InitArgs),
    /// Scaffold a new story, character, or location
    New(NewArgs),
    /// Migrate v1.2 story metadata to v1.3
    Migrate(MigrateArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Repo root to check
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Metadata schema generation to accept ("1.2" or "1.3"; "1.3" also
    /// accepts mixed repos)
    #[arg(long)]
    schema: Option<String>,

    /// Output path for the machine-readable report JSON
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Check a pre-fetched tree snapshot ({tree, files} JSON) instead of
    /// scanning the local filesystem
    #[arg(long, value_name = "PATH", conflicts_with = "report")]
    tree: Option<PathBuf>,

    /// Re-verify a previously written check report instead of validating
    #[arg(long, value_name = "PATH", conflicts_with_all = ["schema", "out"])]
    report: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct LockArgs {
    /// Repo root to lock
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// After locking, point every story's canon_ref at the new commit
    #[arg(long)]
    update_refs: bool,
}

#[derive(Parser, Debug)]
struct InitArgs {
    /// Directory to initialize
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Author recorded in .canonrc.json
    #[arg(long)]
    author: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EntityKind {
    Story,
    Character,
    Location,
}

#[derive(Parser, Debug)]
struct NewArgs {
    /// What to scaffold
    #[arg(value_enum)]
    kind: EntityKind,

    /// Slug for the new entity (lowercase letters, digits, "-", "_")
    id: String,

    /// Repo root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Contributor handle for story metadata (defaults to .canonrc.json author)
    #[arg(long)]
    contributor: Option<String>,
}

#[derive(Parser, Debug)]
struct MigrateArgs {
    /// Repo root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Write migrated files (default is a dry run)
    #[arg(long)]
    apply: bool,

    /// Language whose text survives the bilingual flattening
    /// (defaults to .canonrc.json default_lang)
    #[arg(long)]
    lang: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check(args) => cmd_check(args),
        Commands::Lock(args) => cmd_lock(args),
        Commands::Init(args) => cmd_init(args),
        Commands::New(args) => cmd_new(args),
        Commands::Migrate(args) => cmd_migrate(args),
    }
}

fn cmd_check(args: CheckArgs) -> Result<()> {
    if let Some(report_path) = &args.report {
        return check_stored_report(report_path);
    }
    let accept_v13 = match args.schema.as_deref() {
        None | Some(METADATA_VERSION) | Some("v1.2") => false,
        Some(METADATA_VERSION_V13) | Some("v1.3") => true,
        Some(other) => bail!("unsupported --schema {other:?} (use \"1.2\" or \"1.3\")"),
    };

    let report = if let Some(tree_path) = &args.tree {
        let input: GitHubRepoInput = read_json(tree_path)?;
        if accept_v13 {
            validate_repo_any(&build_repo_model_any(&input)?)
        } else {
            validate_repo(&build_repo_model(&input).map_err(with_v13_hint)?)
        }
    } else if accept_v13 {
        validate_repo_any(&load_repo_from_fs_any(&args.repo)?)
    } else {
        validate_repo(&load_repo_from_fs(&args.repo).map_err(with_v13_hint)?)
    };

    if report.total_stories == 0 {
        bail!("no stories found in stories/");
    }

    print_report(&report);
    if let Some(out) = &args.out {
        write_json(out, &report)?;
        println!("Wrote check report to {}", out.display());
    }

    fail_on_failing_stories(&report)
}

/// A v1.2-only load that tripped over v1.3 metadata gets an actionable
/// remedy instead of a bare version mismatch.
fn with_v13_hint(err: anyhow::Error) -> anyhow::Error {
    if let Some(sve) = err.downcast_ref::<SchemaVersionError>() {
        if sve.actual_str() == Some(METADATA_VERSION_V13) {
            return anyhow::anyhow!("v1.3 metadata detected; rerun with --schema 1.3");
        }
    }
    err
}

fn fail_on_failing_stories(report: &RepoCheckReport) -> Result<()> {
    let failing = report.total_stories - report.passing_stories;
    if failing > 0 {
        bail!("{failing} of {} stories failing", report.total_stories);
    }
    Ok(())
}

/// Gate a stored report's declared generation, then reprint its outcome.
fn check_stored_report(path: &Path) -> Result<()> {
    let raw: Value = read_json(path)?;
    if assert_report_version(&raw).is_err() {
        assert_report_version_v3(&raw).with_context(|| format!("read {}", path.display()))?;
    }
    let report: RepoCheckReport =
        serde_json::from_value(raw).with_context(|| format!("read {}", path.display()))?;
    print_report(&report);
    fail_on_failing_stories(&report)
}

fn print_report(report: &RepoCheckReport) {
    for story in &report.stories {
        let mark = if story.all_pass { "✓" } else { "✗" };
        println!("{mark} {}", story.story_id);
        for check in &story.checks {
            if !check.pass {
                let message = check.message.as_deref().unwrap_or("failed");
                println!("  ✗ {}: {message}", check.id);
            }
        }
    }
    println!();
    println!(
        "{}/{} stories passing",
        report.passing_stories, report.total_stories
    );
}

fn cmd_lock(args: LockArgs) -> Result<()> {
    let lock = lock::regenerate(&args.repo, args.update_refs)?;
    println!("canon.lock.json updated");
    println!("  commit: {}", lock.canon_commit);
    println!("  hash:   {}", lock.worldbuilding_hash);
    Ok(())
}

fn cmd_init(args: InitArgs) -> Result<()> {
    let root = &args.repo;
    for dir in [
        "canon/characters",
        "canon/worldbuilding/locations",
        "stories",
    ] {
        fs::create_dir_all(root.join(dir)).with_context(|| format!("create {dir}"))?;
        println!("created {dir}/");
    }

    let conventions = root.join("CONVENTIONS.md");
    if !conventions.is_file() {
        fs::write(&conventions, templates::CONVENTIONS_MD).context("write CONVENTIONS.md")?;
        println!("created CONVENTIONS.md");
    }

    let config_path = root.join(config::CONFIG_FILE);
    if !config_path.is_file() {
        let config = config::CanonConfig {
            author: args.author.unwrap_or_default(),
            ..config::CanonConfig::default()
        };
        write_json(&config_path, &config)?;
        println!("created {}", config::CONFIG_FILE);
    }

    // canon.lock.json is deliberately not scaffolded; the first
    // `canon lock` after a commit writes the genesis lock.
    println!("run `canon lock` after your first commit to create canon.lock.json");
    Ok(())
}

fn validate_slug(id: &str) -> Result<()> {
    let slug = Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("regex for slug");
    if id.contains("..") || !slug.is_match(id) {
        bail!("invalid id {id:?}: use lowercase letters, digits, \"-\" and \"_\"");
    }
    Ok(())
}

fn cmd_new(args: NewArgs) -> Result<()> {
    validate_slug(&args.id)?;
    let config = config::load(&args.repo);

    match args.kind {
        EntityKind::Story => {
            let contributor = args
                .contributor
                .or_else(|| (!config.author.is_empty()).then(|| config.author.clone()));
            let Some(contributor) = contributor else {
                bail!("contributor required; pass --contributor or set author in .canonrc.json");
            };
            let dir = args.repo.join("stories").join(&args.id);
            let path = dir.join("metadata.json");
            if path.exists() {
                bail!("stories/{}/metadata.json already exists", args.id);
            }
            fs::create_dir_all(&dir).with_context(|| format!("create stories/{}", args.id))?;
            write_json(&path, &templates::story_metadata(&args.id, &contributor))?;
            println!("created stories/{}/metadata.json", args.id);
        }
        EntityKind::Character => {
            let dir = args.repo.join("canon/characters").join(&args.id);
            let path = dir.join("definition.json");
            if path.exists() {
                bail!("canon/characters/{}/definition.json already exists", args.id);
            }
            fs::create_dir_all(&dir)
                .with_context(|| format!("create canon/characters/{}", args.id))?;
            write_json(&path, &templates::character_definition(&args.id))?;
            println!("created canon/characters/{}/definition.json", args.id);
        }
        EntityKind::Location => {
            let path = args
                .repo
                .join("canon/worldbuilding/locations")
                .join(format!("{}.json", args.id));
            if path.exists() {
                bail!("canon/worldbuilding/locations/{}.json already exists", args.id);
            }
            fs::create_dir_all(args.repo.join("canon/worldbuilding/locations"))
                .context("create canon/worldbuilding/locations")?;
            write_json(&path, &templates::location_definition(&args.id))?;
            println!("created canon/worldbuilding/locations/{}.json", args.id);
        }
    }
    Ok(())
}

/// Lift `field` out of a v1.2 bilingual object, keeping the `lang` text and
/// falling back to the other language when the chosen one is absent.
fn flatten_bilingual(obj: &schema::JsonMap, field: &str, lang: &str) -> Result<String> {
    let Some(bilingual) = obj.get(field).and_then(Value::as_object) else {
        bail!("{field} is not a bilingual object");
    };
    let fallback = if lang == "ko" { "en" } else { "ko" };
    let text = bilingual
        .get(lang)
        .and_then(Value::as_str)
        .or_else(|| bilingual.get(fallback).and_then(Value::as_str));
    match text {
        Some(text) => Ok(text.to_string()),
        None => bail!("{field} has no {lang:?} or {fallback:?} text"),
    }
}

fn migrate_story(raw: &schema::JsonMap, lang: &str) -> Result<schema::JsonMap> {
    let mut out = raw.clone();
    out.insert(
        "schema_version".to_string(),
        Value::String(METADATA_VERSION_V13.to_string()),
    );
    out.insert("lang".to_string(), Value::String(lang.to_string()));
    out.insert(
        "title".to_string(),
        Value::String(flatten_bilingual(raw, "title", lang)?),
    );
    out.insert(
        "synopsis".to_string(),
        Value::String(flatten_bilingual(raw, "synopsis", lang)?),
    );
    Ok(out)
}

fn cmd_migrate(args: MigrateArgs) -> Result<()> {
    let config = config::load(&args.repo);
    let lang = args.lang.unwrap_or(config.default_lang);
    let stories_dir = args.repo.join("stories");
    if !stories_dir.is_dir() {
        bail!("no stories found in stories/");
    }

    let mut migrated = 0usize;
    let mut skipped = 0usize;
    let mut errors = 0usize;
    let mut entries: Vec<PathBuf> = fs::read_dir(&stories_dir)
        .context("list stories/")?
        .collect::<std::io::Result<Vec<_>>>()
        .context("list stories/")?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();

    for dir in entries {
        let meta_path = dir.join("metadata.json");
        if !meta_path.is_file() {
            continue;
        }
        let slug = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let raw: Value = match fs::read_to_string(&meta_path)
            .map_err(anyhow::Error::from)
            .and_then(|c| serde_json::from_str(&c).map_err(anyhow::Error::from))
        {
            Ok(raw) => raw,
            Err(err) => {
                eprintln!("✗ {slug}: {err}");
                errors += 1;
                continue;
            }
        };
        let version = raw.get("schema_version").and_then(Value::as_str);
        match version {
            Some(METADATA_VERSION_V13) => {
                println!("- {slug}: already v1.3, skipped");
                skipped += 1;
                continue;
            }
            Some(METADATA_VERSION) => {}
            other => {
                eprintln!("✗ {slug}: unsupported schema_version {other:?}");
                errors += 1;
                continue;
            }
        }
        let obj = raw.as_object().cloned().unwrap_or_default();
        match migrate_story(&obj, &lang) {
            Ok(out) => {
                if args.apply {
                    let backup = dir.join("metadata.json.v12.bak");
                    fs::copy(&meta_path, &backup)
                        .with_context(|| format!("back up stories/{slug}/metadata.json"))?;
                    write_json(&meta_path, &Value::Object(out))?;
                    println!("✓ {slug}: migrated to v1.3");
                } else {
                    println!("✓ {slug}: would migrate to v1.3 (dry run)");
                }
                migrated += 1;
            }
            Err(err) => {
                eprintln!("✗ {slug}: {err}");
                errors += 1;
            }
        }
    }

    println!();
    println!("{migrated} migrated, {skipped} skipped, {errors} errors");
    if !args.apply && migrated > 0 {
        println!("rerun with --apply to write changes");
    }
    if errors > 0 {
        bail!("{errors} stories failed to migrate");
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    fs::write(path, json + "\n").with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
