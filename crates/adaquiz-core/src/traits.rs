//! Boundary traits for the engine's external collaborators.
//!
//! These async traits are implemented by the `adaquiz-adapters` crate (and by
//! whatever hosts the engine). They return `anyhow::Result`; the engine wraps
//! failures into the matching `QuizError` variant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::access::AccessWindow;
use crate::graph::QuizGraph;
use crate::model::AttemptId;
use crate::trace::AttemptTrace;

// ---------------------------------------------------------------------------
// Question evaluator
// ---------------------------------------------------------------------------

/// Grades learner responses for individual questions.
#[async_trait]
pub trait QuestionEvaluator: Send + Sync {
    /// Grade a response, returning a fraction in `[0, 1]`.
    async fn grade(&self, question_id: &str, response: &serde_json::Value)
        -> anyhow::Result<f64>;

    /// Responses to this question are graded later by a person.
    fn is_manually_graded(&self, question_id: &str) -> bool;

    /// The jump out of this question can be evaluated from its grade. When
    /// `false`, the learner must choose the jump.
    fn requires_automatic_jump(&self, question_id: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Aggregate persistence for quiz graphs and attempt traces.
///
/// Saves are all-or-nothing. Both saves carry an optimistic check: the
/// aggregate's `revision`/`version` must match what is stored, otherwise the
/// store fails with [`StoreError::VersionConflict`](crate::error::StoreError).
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn load_graph(&self, quiz_id: &str) -> anyhow::Result<Option<QuizGraph>>;

    /// Save a graph and return its new revision.
    async fn save_graph(&self, graph: &QuizGraph) -> anyhow::Result<u64>;

    /// Delete a graph together with all of its attempts. Returns `false` if
    /// the quiz did not exist.
    async fn delete_quiz(&self, quiz_id: &str) -> anyhow::Result<bool>;

    async fn list_quizzes(&self) -> anyhow::Result<Vec<String>>;

    async fn load_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<Option<AttemptTrace>>;

    /// All attempts of a user on a quiz, oldest first.
    async fn list_attempts(&self, quiz_id: &str, user_id: &str)
        -> anyhow::Result<Vec<AttemptTrace>>;

    /// Commit an attempt header and all its node attempts atomically and
    /// return the new version.
    ///
    /// Inserting an unfinished regular attempt fails with
    /// [`StoreError::OpenAttemptExists`](crate::error::StoreError) while the
    /// same learner has another one open on the quiz. Previews are exempt.
    async fn commit_attempt(&self, trace: &AttemptTrace) -> anyhow::Result<u64>;

    async fn delete_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<bool>;

    /// Take the per-attempt advisory lock without waiting. Fails with
    /// [`StoreError::Locked`](crate::error::StoreError) while another holder
    /// exists. The lock is released when the returned guard drops.
    async fn lock_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<AttemptLock>;
}

/// Held advisory lock on one attempt.
pub struct AttemptLock {
    attempt_id: AttemptId,
    _guard: Box<dyn Send + Sync>,
}

impl AttemptLock {
    pub fn new(attempt_id: AttemptId, guard: impl Send + Sync + 'static) -> Self {
        Self {
            attempt_id,
            _guard: Box::new(guard),
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }
}

impl std::fmt::Debug for AttemptLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptLock")
            .field("attempt_id", &self.attempt_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Gradebook and access policy
// ---------------------------------------------------------------------------

/// Receives quiz grades whenever they may have changed.
#[async_trait]
pub trait GradebookSync: Send + Sync {
    /// `grade` is `None` when the learner no longer has any graded attempt.
    async fn sync_grade(&self, quiz_id: &str, user_id: &str, grade: Option<f64>)
        -> anyhow::Result<()>;
}

/// Decides whether and for how long a learner may attempt a quiz.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn is_attempt_allowed(
        &self,
        quiz_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn effective_overrides(&self, quiz_id: &str, user_id: &str)
        -> anyhow::Result<AccessWindow>;
}
