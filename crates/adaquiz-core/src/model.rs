//! Identifiers and quiz-level settings shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::access::AccessWindow;
use crate::grading::GradeMethod;

/// Stable identity of a node within its quiz graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of a jump case within its quiz graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

pub type AttemptId = Uuid;
pub type NodeAttemptId = Uuid;

/// Per-node behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOptions {
    /// The learner picks which jump case to follow instead of automatic evaluation.
    #[serde(default)]
    pub let_student_choose_jump: bool,
    /// Node attempts on this node reuse the attempt-wide random seed.
    #[serde(default)]
    pub common_random_seed: bool,
}

/// Whether learners may revisit answered positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationMode {
    /// Earlier positions can be redone; later node attempts are discarded.
    #[default]
    Free,
    /// Only the current position can be answered.
    Sequential,
}

impl fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationMode::Free => write!(f, "free"),
            NavigationMode::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for NavigationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(NavigationMode::Free),
            "sequential" | "seq" => Ok(NavigationMode::Sequential),
            other => Err(format!("unknown navigation mode: {other}")),
        }
    }
}

/// Settings of one adaptive quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSettings {
    /// Human-readable name.
    pub name: String,
    /// Grade awarded for a perfect attempt.
    #[serde(default = "default_max_grade")]
    pub max_grade: f64,
    /// How several attempts combine into the quiz grade.
    #[serde(default)]
    pub grade_method: GradeMethod,
    /// Navigation restrictions for learners.
    #[serde(default)]
    pub navigation: NavigationMode,
    /// Base timing and attempt limits before overrides.
    #[serde(default)]
    pub access: AccessWindow,
}

impl QuizSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_grade: default_max_grade(),
            grade_method: GradeMethod::default(),
            navigation: NavigationMode::default(),
            access: AccessWindow::default(),
        }
    }
}

pub fn default_max_grade() -> f64 {
    10.0
}
