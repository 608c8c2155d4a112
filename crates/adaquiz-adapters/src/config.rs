//! Configuration loading and store/policy factories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use adaquiz_core::access::{AccessOverride, OverridePolicy};
use adaquiz_core::grading::GradeMethod;
use adaquiz_core::graph::QuizGraph;
use adaquiz_core::model::{default_max_grade, NavigationMode};
use adaquiz_core::parser::QuizDefaults;
use adaquiz_core::traits::QuizStore;

use crate::memory::MemoryStore;

/// Environment variable that relocates the snapshot directory.
pub const DATA_DIR_ENV: &str = "ADAQUIZ_DATA_DIR";

/// Snapshot file name used under a data directory.
pub const SNAPSHOT_FILE: &str = "adaquiz-store.json";

/// Where quiz graphs and attempts live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process memory only; everything is lost on exit.
    #[default]
    Memory,
    /// Memory plus a JSON snapshot rewritten after every change.
    Snapshot {
        #[serde(default = "default_snapshot_path")]
        path: PathBuf,
    },
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./adaquiz-data").join(SNAPSHOT_FILE)
}

/// A user- or group-level access override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideConfig {
    pub quiz: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub time_open: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub time_close: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl OverrideConfig {
    fn patch(&self) -> AccessOverride {
        AccessOverride {
            time_open: self.time_open.map(Some),
            time_close: self.time_close.map(Some),
            time_limit_secs: self.time_limit_secs.map(Some),
            max_attempts: self.max_attempts.map(Some),
        }
    }
}

/// Group memberships and overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Group id to member user ids.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
}

/// Top-level adaquiz configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaquizConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Max grade for quiz files that do not set one.
    #[serde(default = "default_max_grade")]
    pub default_max_grade: f64,
    #[serde(default)]
    pub default_grade_method: GradeMethod,
    #[serde(default)]
    pub default_navigation: NavigationMode,
    /// Directory scanned for quiz definitions.
    #[serde(default = "default_quizzes_dir")]
    pub quizzes_dir: PathBuf,
    #[serde(default)]
    pub access: AccessConfig,
}

fn default_quizzes_dir() -> PathBuf {
    PathBuf::from("./quizzes")
}

impl Default for AdaquizConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            default_max_grade: default_max_grade(),
            default_grade_method: GradeMethod::default(),
            default_navigation: NavigationMode::default(),
            quizzes_dir: default_quizzes_dir(),
            access: AccessConfig::default(),
        }
    }
}

impl AdaquizConfig {
    /// Parser defaults derived from this configuration.
    pub fn quiz_defaults(&self) -> QuizDefaults {
        QuizDefaults {
            max_grade: self.default_max_grade,
            grade_method: self.default_grade_method,
            navigation: self.default_navigation,
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + end];
        result.push_str(&rest[..start]);
        // substituted values are not scanned again
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `adaquiz.toml` in the current directory
/// 2. `~/.config/adaquiz/config.toml`
///
/// `${VAR}` references in paths are expanded, and `ADAQUIZ_DATA_DIR`
/// relocates the snapshot file.
pub fn load_config() -> Result<AdaquizConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AdaquizConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("adaquiz.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            let config = toml::from_str::<AdaquizConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?;
            tracing::debug!("loaded config from {}", path.display());
            config
        }
        None => AdaquizConfig::default(),
    };

    config.quizzes_dir = resolve_path(&config.quizzes_dir);
    if let StoreConfig::Snapshot { path } = &mut config.store {
        *path = resolve_path(path);
    }

    // Apply env var overrides
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        config.store = StoreConfig::Snapshot {
            path: PathBuf::from(dir).join(SNAPSHOT_FILE),
        };
    }

    if !config.default_max_grade.is_finite() || config.default_max_grade < 0.0 {
        anyhow::bail!(
            "default_max_grade must be a non-negative number, got {}",
            config.default_max_grade
        );
    }

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("adaquiz"))
}

/// Create a store instance from its configuration.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn QuizStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Snapshot { path } => Ok(Arc::new(MemoryStore::with_snapshot(path).await?)),
    }
}

/// Build an access policy from quiz settings plus configured overrides.
pub fn build_access_policy(config: &AccessConfig, graphs: &[QuizGraph]) -> OverridePolicy {
    let mut policy = OverridePolicy::new();
    for graph in graphs {
        policy.set_quiz(&graph.quiz_id, graph.settings.access.clone());
    }
    for (group, members) in &config.groups {
        for user in members {
            policy.add_group_member(group, user);
        }
    }
    for entry in &config.overrides {
        match (&entry.user, &entry.group) {
            (Some(user), _) => policy.set_user_override(&entry.quiz, user, entry.patch()),
            (None, Some(group)) => policy.set_group_override(&entry.quiz, group, entry.patch()),
            (None, None) => {
                tracing::warn!("override for quiz '{}' names no user or group, ignored", entry.quiz)
            }
        }
    }
    policy
}
