//! In-process quiz store with optional JSON snapshot persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use adaquiz_core::error::StoreError;
use adaquiz_core::graph::QuizGraph;
use adaquiz_core::model::AttemptId;
use adaquiz_core::trace::AttemptTrace;
use adaquiz_core::traits::{AttemptLock, QuizStore};

use crate::snapshot::{SnapshotFile, StoreState};

/// A [`QuizStore`] holding every aggregate in memory.
///
/// All writes go through one write lock and are all-or-nothing. With a
/// snapshot file, each write is applied to a copy, persisted, and only then
/// made visible; a failed persist leaves memory untouched.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    locks: Mutex<HashMap<AttemptId, Arc<Mutex<()>>>>,
    snapshot: Option<SnapshotFile>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            locks: Mutex::new(HashMap::new()),
            snapshot: None,
        }
    }

    /// Open a store backed by the snapshot at `path`, loading it if present.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let file = SnapshotFile::new(path);
        let state = file.load().await?;
        tracing::info!(
            graphs = state.graphs.len(),
            attempts = state.attempts.len(),
            "opened snapshot store at {}",
            file.path().display()
        );
        Ok(Self {
            state: RwLock::new(state),
            locks: Mutex::new(HashMap::new()),
            snapshot: Some(file),
        })
    }

    pub fn snapshot(&self) -> Option<&SnapshotFile> {
        self.snapshot.as_ref()
    }

    /// Apply `change` as one transaction.
    async fn mutate<T>(&self, change: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().await;
        match &self.snapshot {
            None => change(&mut *state),
            Some(file) => {
                let mut next = (*state).clone();
                let out = change(&mut next)?;
                file.save(&next).await?;
                *state = next;
                Ok(out)
            }
        }
    }
}

#[async_trait]
impl QuizStore for MemoryStore {
    async fn load_graph(&self, quiz_id: &str) -> Result<Option<QuizGraph>> {
        Ok(self.state.read().await.graphs.get(quiz_id).cloned())
    }

    async fn save_graph(&self, graph: &QuizGraph) -> Result<u64> {
        self.mutate(|state| {
            let found = state
                .graphs
                .get(&graph.quiz_id)
                .map(|g| g.revision)
                .unwrap_or(0);
            if graph.revision != found {
                return Err(StoreError::VersionConflict {
                    entity: format!("quiz '{}'", graph.quiz_id),
                    expected: graph.revision,
                    found,
                }
                .into());
            }
            let mut stored = graph.clone();
            stored.revision = found + 1;
            state.graphs.insert(stored.quiz_id.clone(), stored);
            Ok(found + 1)
        })
        .await
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool> {
        self.mutate(|state| {
            if state.graphs.remove(quiz_id).is_none() {
                return Ok(false);
            }
            state.attempts.retain(|_, t| t.attempt.quiz_id != quiz_id);
            Ok(true)
        })
        .await
    }

    async fn list_quizzes(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.graphs.keys().cloned().collect())
    }

    async fn load_attempt(&self, attempt_id: AttemptId) -> Result<Option<AttemptTrace>> {
        Ok(self.state.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn list_attempts(&self, quiz_id: &str, user_id: &str) -> Result<Vec<AttemptTrace>> {
        let state = self.state.read().await;
        let mut attempts: Vec<AttemptTrace> = state
            .attempts
            .values()
            .filter(|t| t.attempt.quiz_id == quiz_id && t.attempt.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|t| t.attempt.created_at);
        Ok(attempts)
    }

    async fn commit_attempt(&self, trace: &AttemptTrace) -> Result<u64> {
        self.mutate(|state| {
            if !state.graphs.contains_key(&trace.attempt.quiz_id) {
                anyhow::bail!("quiz '{}' no longer exists", trace.attempt.quiz_id);
            }
            let found = state
                .attempts
                .get(&trace.id())
                .map(|t| t.attempt.version)
                .unwrap_or(0);
            if trace.attempt.version != found {
                return Err(StoreError::VersionConflict {
                    entity: format!("attempt {}", trace.id()),
                    expected: trace.attempt.version,
                    found,
                }
                .into());
            }
            if found == 0 && opens_regular_attempt(trace) {
                let open = state.attempts.values().any(|t| {
                    opens_regular_attempt(t)
                        && t.attempt.quiz_id == trace.attempt.quiz_id
                        && t.attempt.user_id == trace.attempt.user_id
                });
                if open {
                    return Err(StoreError::OpenAttemptExists {
                        quiz_id: trace.attempt.quiz_id.clone(),
                        user_id: trace.attempt.user_id.clone(),
                    }
                    .into());
                }
            }
            let mut stored = trace.clone();
            stored.attempt.version = found + 1;
            state.attempts.insert(stored.id(), stored);
            Ok(found + 1)
        })
        .await
    }

    async fn delete_attempt(&self, attempt_id: AttemptId) -> Result<bool> {
        let removed = self
            .mutate(|state| Ok(state.attempts.remove(&attempt_id).is_some()))
            .await?;
        if removed {
            self.locks.lock().await.remove(&attempt_id);
        }
        Ok(removed)
    }

    async fn lock_attempt(&self, attempt_id: AttemptId) -> Result<AttemptLock> {
        let slot = {
            let mut locks = self.locks.lock().await;
            // slots nobody holds a guard on can go
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(attempt_id).or_default())
        };
        let guard = slot
            .try_lock_owned()
            .map_err(|_| StoreError::Locked(attempt_id))?;
        Ok(AttemptLock::new(attempt_id, guard))
    }
}

fn opens_regular_attempt(trace: &AttemptTrace) -> bool {
    !trace.attempt.is_preview && !trace.is_finished()
}
