//! Jump rule sets: the ordered conditional cases attached to one node.
//!
//! Cases are evaluated in ascending position and the first one whose
//! condition holds decides the next node. Every rule set keeps at least one
//! catch-all case (`Unconditional` or `FinishQuiz`), so evaluation always
//! resolves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QuizError, Result};
use crate::model::{CaseId, NodeId};

/// Strict comparison used by grade thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
}

impl Comparator {
    pub fn holds(self, fraction: f64, value: f64) -> bool {
        match self {
            Comparator::LessThan => fraction < value,
            Comparator::GreaterThan => fraction > value,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::LessThan => write!(f, "<"),
            Comparator::GreaterThan => write!(f, ">"),
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "<" | "lt" => Ok(Comparator::LessThan),
            ">" | "gt" => Ok(Comparator::GreaterThan),
            other => Err(format!("unknown comparator: {other}")),
        }
    }
}

/// Condition under which a case fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JumpCondition {
    /// Always fires and continues to its destination.
    Unconditional,
    /// Fires when the node attempt's fraction compares strictly against `value`.
    GradeThreshold { comparator: Comparator, value: f64 },
    /// Always fires and ends the attempt.
    FinishQuiz,
}

impl JumpCondition {
    pub fn threshold(comparator: Comparator, value: f64) -> Self {
        JumpCondition::GradeThreshold { comparator, value }
    }

    /// Catch-all conditions hold for every fraction.
    pub fn is_catch_all(&self) -> bool {
        matches!(
            self,
            JumpCondition::Unconditional | JumpCondition::FinishQuiz
        )
    }

    pub fn holds(&self, fraction: f64) -> bool {
        match *self {
            JumpCondition::Unconditional | JumpCondition::FinishQuiz => true,
            JumpCondition::GradeThreshold { comparator, value } => {
                comparator.holds(fraction, value)
            }
        }
    }

    fn default_name(&self) -> String {
        match self {
            JumpCondition::Unconditional => "Continue".to_string(),
            JumpCondition::GradeThreshold { comparator, value } => {
                format!("Grade {comparator} {value}")
            }
            JumpCondition::FinishQuiz => "Finish quiz".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if let JumpCondition::GradeThreshold { value, .. } = *self {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(QuizError::InvalidThreshold(value));
            }
        }
        Ok(())
    }
}

impl fmt::Display for JumpCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpCondition::Unconditional => write!(f, "always"),
            JumpCondition::GradeThreshold { comparator, value } => {
                write!(f, "grade {comparator} {value}")
            }
            JumpCondition::FinishQuiz => write!(f, "finish"),
        }
    }
}

/// One conditional branch of a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpCase {
    pub id: CaseId,
    /// Node owning the rule set.
    pub source: NodeId,
    /// Evaluation order, dense within the rule set.
    pub position: usize,
    pub condition: JumpCondition,
    /// Target node; `None` is the end-of-quiz sentinel.
    #[serde(default)]
    pub destination: Option<NodeId>,
    pub name: String,
}

impl JumpCase {
    /// Where the case leads. `FinishQuiz` always ends the attempt.
    pub fn target(&self) -> Option<NodeId> {
        match self.condition {
            JumpCondition::FinishQuiz => None,
            _ => self.destination,
        }
    }
}

/// The ordered cases of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpRuleSet {
    node_id: NodeId,
    cases: Vec<JumpCase>,
}

impl JumpRuleSet {
    /// A fresh rule set holding the single default `FinishQuiz` case.
    pub fn finish_only(node_id: NodeId, case_id: CaseId) -> Self {
        let condition = JumpCondition::FinishQuiz;
        Self {
            node_id,
            cases: vec![JumpCase {
                id: case_id,
                source: node_id,
                position: 0,
                condition,
                destination: None,
                name: condition.default_name(),
            }],
        }
    }

    /// Build a rule set from `(id, condition, destination, name)` entries in
    /// evaluation order. Fails unless the result has a catch-all.
    pub fn from_cases(
        node_id: NodeId,
        entries: Vec<(CaseId, JumpCondition, Option<NodeId>, Option<String>)>,
    ) -> Result<Self> {
        let mut set = Self {
            node_id,
            cases: Vec::with_capacity(entries.len()),
        };
        for (id, condition, destination, name) in entries {
            set.push_case(id, condition, destination, name)?;
        }
        if !set.has_catch_all() {
            return Err(QuizError::MissingCatchAll { node_id });
        }
        Ok(set)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn cases(&self) -> &[JumpCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&JumpCase> {
        self.cases.get(position)
    }

    pub fn case_by_id(&self, id: CaseId) -> Option<&JumpCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// First case (in evaluation order) with the given display name.
    pub fn case_by_name(&self, name: &str) -> Option<&JumpCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn has_catch_all(&self) -> bool {
        self.cases.iter().any(|c| c.condition.is_catch_all())
    }

    /// `true` while the rule set is still the untouched `[FinishQuiz]` default.
    pub fn is_finish_only(&self) -> bool {
        self.cases.len() == 1 && self.cases[0].condition == JumpCondition::FinishQuiz
    }

    /// Return the first case whose condition holds for `fraction`.
    pub fn evaluate(&self, fraction: f64) -> Result<&JumpCase> {
        self.cases
            .iter()
            .find(|c| c.condition.holds(fraction))
            .ok_or(QuizError::MisconfiguredRuleSet {
                node_id: self.node_id,
            })
    }

    /// Append a case at the end of the evaluation order.
    pub fn add_case(
        &mut self,
        id: CaseId,
        condition: JumpCondition,
        destination: Option<NodeId>,
        name: Option<String>,
    ) -> Result<&JumpCase> {
        let position = self.push_case(id, condition, destination, name)?;
        Ok(&self.cases[position])
    }

    /// Delete the case at `position`, keeping a catch-all among the rest.
    pub fn delete_case(&mut self, position: usize) -> Result<JumpCase> {
        if position >= self.cases.len() {
            return Err(QuizError::CaseNotFound {
                node_id: self.node_id,
                position,
            });
        }
        let remainder_has_catch_all = self
            .cases
            .iter()
            .enumerate()
            .any(|(i, c)| i != position && c.condition.is_catch_all());
        if !remainder_has_catch_all {
            return Err(QuizError::CaseNotDeletable {
                node_id: self.node_id,
                position,
            });
        }
        let removed = self.cases.remove(position);
        self.renumber();
        Ok(removed)
    }

    /// Swap the evaluation positions of two cases.
    pub fn reorder(&mut self, a: usize, b: usize) -> Result<()> {
        for position in [a, b] {
            if position >= self.cases.len() {
                return Err(QuizError::CaseNotFound {
                    node_id: self.node_id,
                    position,
                });
            }
        }
        self.cases.swap(a, b);
        self.renumber();
        Ok(())
    }

    /// Rewrite every case targeting `node_id` to the end-of-quiz sentinel.
    /// Returns how many cases were rewritten.
    pub fn remove_references_to(&mut self, node_id: NodeId) -> usize {
        let mut rewritten = 0;
        for case in &mut self.cases {
            if case.destination == Some(node_id) {
                case.destination = None;
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Turn the default `[FinishQuiz]` case into `Unconditional -> destination`.
    pub(crate) fn chain_to(&mut self, destination: NodeId) {
        if let Some(case) = self.cases.first_mut() {
            case.condition = JumpCondition::Unconditional;
            case.destination = Some(destination);
            case.name = "Next question".to_string();
        }
    }

    /// Positions of cases that can never fire because an earlier catch-all
    /// always wins.
    pub fn shadowed_positions(&self) -> Vec<usize> {
        match self.cases.iter().position(|c| c.condition.is_catch_all()) {
            Some(first) => (first + 1..self.cases.len()).collect(),
            None => Vec::new(),
        }
    }

    fn push_case(
        &mut self,
        id: CaseId,
        condition: JumpCondition,
        destination: Option<NodeId>,
        name: Option<String>,
    ) -> Result<usize> {
        condition.validate()?;
        let destination = match condition {
            JumpCondition::FinishQuiz => None,
            _ => destination,
        };
        let position = self.cases.len();
        self.cases.push(JumpCase {
            id,
            source: self.node_id,
            position,
            condition,
            destination,
            name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| condition.default_name()),
        });
        Ok(position)
    }

    fn renumber(&mut self) {
        for (position, case) in self.cases.iter_mut().enumerate() {
            case.position = position;
        }
    }
}
