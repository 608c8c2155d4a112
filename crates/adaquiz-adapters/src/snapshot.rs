//! JSON snapshot persistence for the in-memory store.
//!
//! The whole store state is written to one JSON file. Writes go to a
//! sibling temp file first and are renamed over the target, so a crash
//! leaves either the old or the new snapshot on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use adaquiz_core::graph::QuizGraph;
use adaquiz_core::model::AttemptId;
use adaquiz_core::trace::AttemptTrace;

/// Everything a store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub graphs: BTreeMap<String, QuizGraph>,
    #[serde(default)]
    pub attempts: BTreeMap<AttemptId, AttemptTrace>,
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty store.
    pub async fn load(&self) -> Result<StoreState> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no snapshot at {}, starting empty", self.path.display());
                return Ok(StoreState::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read snapshot: {}", self.path.display()))
            }
        };
        let state: StoreState = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot: {}", self.path.display()))?;
        tracing::debug!(
            graphs = state.graphs.len(),
            attempts = state.attempts.len(),
            "loaded snapshot {}",
            self.path.display()
        );
        Ok(state)
    }

    /// Atomically replace the snapshot with `state`.
    pub async fn save(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).context("failed to serialize snapshot")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("failed to replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}
