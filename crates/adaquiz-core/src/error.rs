//! Engine and store error types.
//!
//! `QuizError` is what every engine operation returns. `StoreError` is raised
//! by store implementations inside an `anyhow::Error`; it lives here so the
//! engine can downcast and classify conflicts without string matching.

use thiserror::Error;

use crate::model::{AttemptId, CaseId, NodeId};
use crate::trace::AttemptState;

/// Errors produced by the adaptive navigation engine.
#[derive(Debug, Error)]
pub enum QuizError {
    /// No case of a rule set matched. Unreachable while the catch-all invariant holds.
    #[error("rule set of node {node_id} has no matching case")]
    MisconfiguredRuleSet { node_id: NodeId },

    /// A case points at a node that is not part of the graph.
    #[error("case {case_id} of node {node_id} targets missing node {destination}")]
    DanglingDestination {
        node_id: NodeId,
        case_id: CaseId,
        destination: NodeId,
    },

    /// A committed graph failed validation after an edit.
    #[error("graph integrity violated: {0}")]
    Integrity(String),

    /// The question is already placed in this quiz.
    #[error("question '{question_id}' is already part of quiz '{quiz_id}'")]
    DuplicateQuestion {
        quiz_id: String,
        question_id: String,
    },

    /// Deleting the case would leave the rule set without a catch-all.
    #[error("case {position} of node {node_id} is the last catch-all and cannot be deleted")]
    CaseNotDeletable { node_id: NodeId, position: usize },

    /// A replacement rule set has no `Unconditional` or `FinishQuiz` case.
    #[error("rule set of node {node_id} needs an unconditional or finish case")]
    MissingCatchAll { node_id: NodeId },

    /// Sequential navigation forbids going back to an answered position.
    #[error(
        "attempt {attempt_id} navigates sequentially; cannot return to position {requested} from {current}"
    )]
    OutOfSequenceNavigation {
        attempt_id: AttemptId,
        requested: usize,
        current: usize,
    },

    #[error("attempt {0} is already finished")]
    AttemptAlreadyFinished(AttemptId),

    /// Another operation changed the entity first. Callers may retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("quiz '{0}' not found")]
    QuizNotFound(String),

    #[error("quiz '{0}' already exists")]
    QuizAlreadyExists(String),

    #[error("quiz '{0}' has no questions")]
    EmptyQuiz(String),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {node_id} has no jump case at position {position}")]
    CaseNotFound { node_id: NodeId, position: usize },

    #[error("node {0} cannot move further in that direction")]
    NodeAtBoundary(NodeId),

    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),

    #[error("attempt {attempt_id} has no node attempt at position {position}")]
    PositionNotFound {
        attempt_id: AttemptId,
        position: usize,
    },

    #[error("attempt {attempt_id} cannot {action} while {state}")]
    InvalidTransition {
        attempt_id: AttemptId,
        state: AttemptState,
        action: &'static str,
    },

    #[error("grade weight must be a finite non-negative number, got {0}")]
    InvalidGradeWeight(f64),

    #[error("threshold must lie within [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("question evaluator returned {0}, expected a fraction within [0, 1]")]
    InvalidFraction(f64),

    /// The node lets the learner pick the jump, but no choice was given.
    #[error("node {node_id} requires the learner to choose a jump")]
    JumpChoiceRequired { node_id: NodeId },

    #[error("node {node_id} has no jump case named '{choice}'")]
    UnknownJumpChoice { node_id: NodeId, choice: String },

    #[error("node {node_id} resolves its jump automatically; a choice is not accepted")]
    JumpChoiceNotAllowed { node_id: NodeId },

    /// The current node attempt has not been graded yet.
    #[error("node attempt at position {position} has no grade yet")]
    GradePending { position: usize },

    #[error("user '{user_id}' may not attempt quiz '{quiz_id}': {reason}")]
    AttemptNotAllowed {
        quiz_id: String,
        user_id: String,
        reason: String,
    },

    #[error("question evaluator failed: {0:#}")]
    Evaluator(anyhow::Error),

    #[error("store failed: {0:#}")]
    Store(anyhow::Error),

    #[error("gradebook sync failed: {0:#}")]
    Gradebook(anyhow::Error),

    #[error("access policy failed: {0:#}")]
    AccessPolicy(anyhow::Error),
}

impl QuizError {
    /// Returns `true` for violations of graph or trace invariants. These are
    /// bugs, never the caller's fault.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            QuizError::MisconfiguredRuleSet { .. }
                | QuizError::DanglingDestination { .. }
                | QuizError::Integrity(_)
        )
    }

    /// Returns `true` if the caller can correct the input or retry the step.
    pub fn is_recoverable(&self) -> bool {
        !self.is_integrity_violation()
            && !matches!(
                self,
                QuizError::Evaluator(_)
                    | QuizError::Store(_)
                    | QuizError::Gradebook(_)
                    | QuizError::AccessPolicy(_)
            )
    }

    /// Returns `true` if the error signals lost concurrency control.
    pub fn is_conflict(&self) -> bool {
        matches!(self, QuizError::ConcurrentModification(_))
    }
}

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another operation holds the per-attempt lock.
    #[error("attempt {0} is locked by another operation")]
    Locked(AttemptId),

    /// The learner already has an unfinished regular attempt on the quiz.
    #[error("user '{user_id}' already has an open attempt on quiz '{quiz_id}'")]
    OpenAttemptExists { quiz_id: String, user_id: String },

    /// The stored version moved on since the aggregate was loaded.
    #[error("stale {entity}: expected version {expected}, found {found}")]
    VersionConflict {
        entity: String,
        expected: u64,
        found: u64,
    },
}

impl From<anyhow::Error> for QuizError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(store_err) => QuizError::ConcurrentModification(store_err.to_string()),
            None => QuizError::Store(err),
        }
    }
}

pub type Result<T, E = QuizError> = std::result::Result<T, E>;
