//! Attempt traces: one learner's path through a quiz graph.
//!
//! The trace owns its node attempts. Positions are dense `0..K`; the last
//! one is current while the attempt is open. Every transition is checked
//! first (`check_*`) and applied second, so a rejected step never mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{QuizError, Result};
use crate::graph::Node;
use crate::jump::JumpCase;
use crate::model::{AttemptId, CaseId, NavigationMode, NodeAttemptId, NodeId};

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    /// Waiting for a response on the current node attempt.
    Answering,
    /// The current node attempt has a response; the jump is not decided yet.
    Reviewing,
    Finished,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Answering => write!(f, "answering"),
            AttemptState::Reviewing => write!(f, "reviewing"),
            AttemptState::Finished => write!(f, "finished"),
        }
    }
}

/// Attempt header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub quiz_id: String,
    pub user_id: String,
    pub is_preview: bool,
    pub random_seed: u64,
    pub state: AttemptState,
    /// Stored version; the store rejects commits made from a stale copy.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// When the attempt must end, from the effective access window.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Final grade on the quiz scale, set when the attempt finishes.
    #[serde(default)]
    pub grade: Option<f64>,
}

/// One visited node within an attempt.
///
/// The question id and grade weight are captured when the node attempt is
/// created, so the record stays gradable after the node is edited or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttempt {
    pub id: NodeAttemptId,
    pub attempt_id: AttemptId,
    pub node_id: NodeId,
    pub question_id: String,
    pub position: usize,
    pub grade_weight: f64,
    pub random_seed: u64,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    /// Fraction in `[0, 1]`; `None` until graded.
    #[serde(default)]
    pub grade: Option<f64>,
    /// Set once the jump out of this node is decided; immutable afterwards.
    #[serde(default)]
    pub jump_case_taken: Option<CaseId>,
    pub created_at: DateTime<Utc>,
}

/// Seed for the node attempt at `position`.
pub fn node_seed(attempt_seed: u64, position: usize, common: bool) -> u64 {
    if common {
        attempt_seed
    } else {
        attempt_seed ^ (position as u64 + 1).wrapping_mul(SEED_MIX)
    }
}

/// A fully loaded attempt: header plus every node attempt in position order.
///
/// Deserializing goes through [`AttemptTrace::from_parts`], so a stored trace
/// with missing or misplaced node attempts fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredTrace")]
pub struct AttemptTrace {
    pub attempt: Attempt,
    steps: Vec<NodeAttempt>,
}

#[derive(Deserialize)]
struct StoredTrace {
    attempt: Attempt,
    steps: Vec<NodeAttempt>,
}

impl TryFrom<StoredTrace> for AttemptTrace {
    type Error = QuizError;

    fn try_from(stored: StoredTrace) -> Result<Self> {
        Self::from_parts(stored.attempt, stored.steps)
    }
}

impl AttemptTrace {
    /// Open a new attempt positioned on `first`.
    pub fn start(
        quiz_id: &str,
        user_id: &str,
        is_preview: bool,
        random_seed: u64,
        first: &Node,
        now: DateTime<Utc>,
    ) -> Self {
        let attempt = Attempt {
            id: Uuid::new_v4(),
            quiz_id: quiz_id.to_string(),
            user_id: user_id.to_string(),
            is_preview,
            random_seed,
            state: AttemptState::Answering,
            version: 0,
            created_at: now,
            modified_at: now,
            finished_at: None,
            deadline: None,
            grade: None,
        };
        let mut trace = Self {
            attempt,
            steps: Vec::new(),
        };
        trace.push_step(first, now);
        trace
    }

    /// Rebuild a trace from stored parts, checking position density.
    pub fn from_parts(attempt: Attempt, mut steps: Vec<NodeAttempt>) -> Result<Self> {
        steps.sort_by_key(|s| s.position);
        for (index, step) in steps.iter().enumerate() {
            if step.position != index || step.attempt_id != attempt.id {
                return Err(QuizError::Integrity(format!(
                    "attempt {} has a malformed node attempt at position {}",
                    attempt.id, step.position
                )));
            }
        }
        if steps.is_empty() {
            return Err(QuizError::Integrity(format!(
                "attempt {} has no node attempts",
                attempt.id
            )));
        }
        Ok(Self { attempt, steps })
    }

    pub fn id(&self) -> AttemptId {
        self.attempt.id
    }

    pub fn state(&self) -> AttemptState {
        self.attempt.state
    }

    pub fn is_finished(&self) -> bool {
        self.attempt.state == AttemptState::Finished
    }

    pub fn steps(&self) -> &[NodeAttempt] {
        &self.steps
    }

    /// The node attempt the learner is on (the last one).
    pub fn current(&self) -> &NodeAttempt {
        // `steps` is never empty: `start` and `from_parts` both guarantee one.
        &self.steps[self.steps.len() - 1]
    }

    pub fn current_position(&self) -> usize {
        self.steps.len() - 1
    }

    pub fn step(&self, position: usize) -> Result<&NodeAttempt> {
        self.steps.get(position).ok_or(QuizError::PositionNotFound {
            attempt_id: self.attempt.id,
            position,
        })
    }

    /// Check that a response may be recorded at `position`.
    ///
    /// The current position accepts a response while answering or reviewing.
    /// An earlier position is a redo, allowed only in free navigation.
    pub fn check_submit(&self, position: usize, navigation: NavigationMode) -> Result<()> {
        self.check_open()?;
        let current = self.current_position();
        if position > current {
            return Err(QuizError::PositionNotFound {
                attempt_id: self.attempt.id,
                position,
            });
        }
        if position < current && navigation == NavigationMode::Sequential {
            return Err(QuizError::OutOfSequenceNavigation {
                attempt_id: self.attempt.id,
                requested: position,
                current,
            });
        }
        Ok(())
    }

    /// Store a response and its grade at `position`, moving to `Reviewing`.
    ///
    /// Redoing an earlier position replaces its node attempt with a fresh one
    /// and drops every later node attempt. Call [`check_submit`] first.
    ///
    /// [`check_submit`]: AttemptTrace::check_submit
    pub fn record_response(
        &mut self,
        position: usize,
        response: serde_json::Value,
        grade: Option<f64>,
        now: DateTime<Utc>,
    ) {
        if position < self.current_position() {
            self.steps.truncate(position + 1);
            let redone = &mut self.steps[position];
            redone.id = Uuid::new_v4();
            redone.jump_case_taken = None;
            redone.created_at = now;
        }
        let step = &mut self.steps[position];
        step.response = Some(response);
        step.grade = grade;
        self.attempt.state = AttemptState::Reviewing;
        self.attempt.modified_at = now;
    }

    /// Set the grade of an already answered node attempt.
    pub fn set_grade(&mut self, position: usize, grade: f64, now: DateTime<Utc>) -> Result<()> {
        let attempt_id = self.attempt.id;
        let step = self
            .steps
            .get_mut(position)
            .ok_or(QuizError::PositionNotFound {
                attempt_id,
                position,
            })?;
        step.grade = Some(grade);
        self.attempt.modified_at = now;
        Ok(())
    }

    /// Check that the jump out of `position` may be decided now.
    ///
    /// A position behind the current one means another call already advanced.
    pub fn check_advance(&self, position: usize) -> Result<&NodeAttempt> {
        self.check_open()?;
        let current = self.current_position();
        if position < current {
            return Err(QuizError::ConcurrentModification(format!(
                "attempt {} already advanced past position {position}",
                self.attempt.id
            )));
        }
        if position > current {
            return Err(QuizError::PositionNotFound {
                attempt_id: self.attempt.id,
                position,
            });
        }
        if self.attempt.state != AttemptState::Reviewing {
            return Err(QuizError::InvalidTransition {
                attempt_id: self.attempt.id,
                state: self.attempt.state,
                action: "advance",
            });
        }
        Ok(self.current())
    }

    /// Record the case taken out of the current node and move on.
    ///
    /// With a destination a node attempt is appended and the attempt goes
    /// back to `Answering`; without one the attempt finishes. Returns `true`
    /// when the attempt finished.
    pub fn advance(
        &mut self,
        case: &JumpCase,
        destination: Option<&Node>,
        now: DateTime<Utc>,
    ) -> bool {
        let position = self.current_position();
        self.steps[position].jump_case_taken = Some(case.id);
        match destination {
            Some(node) => {
                self.push_step(node, now);
                self.attempt.state = AttemptState::Answering;
                self.attempt.modified_at = now;
                false
            }
            None => {
                self.finish(now);
                true
            }
        }
    }

    /// End the attempt regardless of the current node. The current node
    /// attempt keeps no jump.
    pub fn force_finish(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.check_open()?;
        self.finish(now);
        Ok(())
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_finished() && self.attempt.deadline.is_some_and(|d| now > d)
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.attempt.state = AttemptState::Finished;
        self.attempt.finished_at = Some(now);
        self.attempt.modified_at = now;
    }

    fn check_open(&self) -> Result<()> {
        if self.is_finished() {
            Err(QuizError::AttemptAlreadyFinished(self.attempt.id))
        } else {
            Ok(())
        }
    }

    fn push_step(&mut self, node: &Node, now: DateTime<Utc>) {
        let position = self.steps.len();
        self.steps.push(NodeAttempt {
            id: Uuid::new_v4(),
            attempt_id: self.attempt.id,
            node_id: node.id,
            question_id: node.question_id.clone(),
            position,
            grade_weight: node.grade_weight,
            random_seed: node_seed(
                self.attempt.random_seed,
                position,
                node.options.common_random_seed,
            ),
            response: None,
            grade: None,
            jump_case_taken: None,
            created_at: now,
        });
    }
}
