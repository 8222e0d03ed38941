//! Per-repo tool configuration (`.canonrc.json`).
//!
//! Config is advisory: a missing or malformed file falls back to defaults
//! instead of failing the command. Only documents the tool itself writes
//! are held to the strict version gate.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_VERSION: &str = "canonrc.v1";
pub const CONFIG_FILE: &str = ".canonrc.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub schema_version: String,
    pub author: String,
    pub default_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

impl Default for CanonConfig {
    fn default() -> Self {
        CanonConfig {
            schema_version: CONFIG_VERSION.to_string(),
            author: String::new(),
            default_lang: "ko".to_string(),
            repo_url: None,
        }
    }
}

/// Load config from `repo_root`, tolerating absence and malformed content.
pub fn load(repo_root: &Path) -> CanonConfig {
    let path = repo_root.join(CONFIG_FILE);
    let Ok(content) = fs::read_to_string(&path) else {
        return CanonConfig::default();
    };
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, "malformed {CONFIG_FILE}; using defaults");
            CanonConfig::default()
        }
    }
}
