//! The node graph of one adaptive quiz.
//!
//! Nodes are kept in a vector whose index is the node's position, so
//! positions stay dense after every edit. Each node owns its jump rule set.
//! Every mutator checks its preconditions before touching anything, so a
//! failed edit leaves the graph exactly as it was.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QuizError, Result};
use crate::jump::{JumpCase, JumpCondition, JumpRuleSet};
use crate::model::{CaseId, NodeId, NodeOptions, QuizSettings};

/// One question placement within the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub quiz_id: String,
    /// 0-based rank, dense within the quiz.
    pub position: usize,
    pub question_id: String,
    /// Maximum contribution of this node to an attempt grade.
    pub grade_weight: f64,
    #[serde(default)]
    pub options: NodeOptions,
    pub jumps: JumpRuleSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A case to install through [`QuizGraph::replace_jumps`].
#[derive(Debug, Clone, PartialEq)]
pub struct JumpSpec {
    pub condition: JumpCondition,
    pub destination: Option<NodeId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// A finding from [`QuizGraph::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphIssue {
    pub severity: Severity,
    pub node_id: Option<NodeId>,
    pub message: String,
}

/// All nodes of one quiz plus its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizGraph {
    pub quiz_id: String,
    pub settings: QuizSettings,
    nodes: Vec<Node>,
    next_node_id: u64,
    next_case_id: u64,
    /// Bumped by the store on every committed save; used for optimistic checks.
    #[serde(default)]
    pub revision: u64,
}

impl QuizGraph {
    pub fn new(quiz_id: impl Into<String>, settings: QuizSettings) -> Self {
        Self {
            quiz_id: quiz_id.into(),
            settings,
            nodes: Vec::new(),
            next_node_id: 1,
            next_case_id: 1,
            revision: 0,
        }
    }

    /// Nodes in position order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: NodeId) -> Result<&Node> {
        self.find(node_id).ok_or(QuizError::NodeNotFound(node_id))
    }

    pub fn find(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn first_node(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn node_by_question(&self, question_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.question_id == question_id)
    }

    /// Sum of every node's grade weight.
    pub fn total_weight(&self) -> f64 {
        self.nodes.iter().map(|n| n.grade_weight).sum()
    }

    /// Append a node for `question_id` and chain the previous last node to it.
    ///
    /// The previous node is only rewired while its rule set is still the
    /// `[FinishQuiz]` default; edited rule sets are left alone.
    pub fn add_question(&mut self, question_id: &str, grade_weight: f64) -> Result<&Node> {
        if self.node_by_question(question_id).is_some() {
            return Err(QuizError::DuplicateQuestion {
                quiz_id: self.quiz_id.clone(),
                question_id: question_id.to_string(),
            });
        }
        check_weight(grade_weight)?;

        let id = self.allocate_node_id();
        let case_id = self.allocate_case_id();

        if let Some(previous) = self.nodes.last_mut() {
            if previous.jumps.is_finish_only() {
                previous.jumps.chain_to(id);
            }
        }

        let position = self.nodes.len();
        self.nodes.push(Node {
            id,
            quiz_id: self.quiz_id.clone(),
            position,
            question_id: question_id.to_string(),
            grade_weight,
            options: NodeOptions::default(),
            jumps: JumpRuleSet::finish_only(id, case_id),
        });
        tracing::debug!(quiz = %self.quiz_id, node = %id, position, "added question {question_id}");
        Ok(&self.nodes[position])
    }

    /// Remove a node, renumber the rest, and point every case that targeted
    /// it at the end of the quiz.
    pub fn delete_node(&mut self, node_id: NodeId) -> Result<Node> {
        let index = self.index_of(node_id)?;
        let removed = self.nodes.remove(index);
        let mut rewritten = 0;
        for node in &mut self.nodes {
            rewritten += node.jumps.remove_references_to(node_id);
        }
        self.renumber();
        tracing::debug!(
            quiz = %self.quiz_id,
            node = %node_id,
            rewritten,
            "deleted node, rewrote references to end of quiz"
        );
        Ok(removed)
    }

    /// Swap a node with its immediate neighbour.
    pub fn move_node(&mut self, node_id: NodeId, direction: Direction) -> Result<()> {
        let index = self.index_of(node_id)?;
        let other = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < self.nodes.len() => index + 1,
            _ => return Err(QuizError::NodeAtBoundary(node_id)),
        };
        self.nodes.swap(index, other);
        self.renumber();
        Ok(())
    }

    pub fn set_grade_weight(&mut self, node_id: NodeId, grade_weight: f64) -> Result<()> {
        check_weight(grade_weight)?;
        let index = self.index_of(node_id)?;
        self.nodes[index].grade_weight = grade_weight;
        Ok(())
    }

    pub fn set_options(&mut self, node_id: NodeId, options: NodeOptions) -> Result<()> {
        let index = self.index_of(node_id)?;
        self.nodes[index].options = options;
        Ok(())
    }

    /// Append a case to a node's rule set.
    pub fn add_jump_case(
        &mut self,
        node_id: NodeId,
        condition: JumpCondition,
        destination: Option<NodeId>,
        name: Option<String>,
    ) -> Result<&JumpCase> {
        let index = self.index_of(node_id)?;
        if let Some(destination) = destination {
            self.index_of(destination)?;
        }
        // Validate on a copy so a rejected case does not burn an id.
        let mut jumps = self.nodes[index].jumps.clone();
        let case_id = CaseId(self.next_case_id);
        jumps.add_case(case_id, condition, destination, name)?;
        self.next_case_id += 1;
        self.nodes[index].jumps = jumps;
        let jumps = &self.nodes[index].jumps;
        Ok(&jumps.cases()[jumps.len() - 1])
    }

    pub fn delete_jump_case(&mut self, node_id: NodeId, position: usize) -> Result<JumpCase> {
        let index = self.index_of(node_id)?;
        self.nodes[index].jumps.delete_case(position)
    }

    /// Swap two cases of a node's rule set.
    pub fn reorder_jump_cases(&mut self, node_id: NodeId, a: usize, b: usize) -> Result<()> {
        let index = self.index_of(node_id)?;
        self.nodes[index].jumps.reorder(a, b)
    }

    /// Swap a case with its adjacent case.
    pub fn move_jump_case(
        &mut self,
        node_id: NodeId,
        position: usize,
        direction: Direction,
    ) -> Result<()> {
        let index = self.index_of(node_id)?;
        let other = match direction {
            Direction::Up => position.checked_sub(1),
            Direction::Down => position.checked_add(1),
        }
        .ok_or(QuizError::CaseNotFound { node_id, position })?;
        self.nodes[index].jumps.reorder(position, other)
    }

    /// Replace a node's whole rule set in one step.
    pub fn replace_jumps(&mut self, node_id: NodeId, specs: Vec<JumpSpec>) -> Result<()> {
        let index = self.index_of(node_id)?;
        for destination in specs.iter().filter_map(|s| s.destination) {
            self.index_of(destination)?;
        }
        let first_id = self.next_case_id;
        let count = specs.len() as u64;
        let entries = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                (
                    CaseId(first_id + i as u64),
                    spec.condition,
                    spec.destination,
                    spec.name,
                )
            })
            .collect();
        let jumps = JumpRuleSet::from_cases(node_id, entries)?;
        self.next_case_id += count;
        self.nodes[index].jumps = jumps;
        Ok(())
    }

    /// Resolve a case's destination. `Ok(None)` is the end of the quiz.
    pub fn resolve_destination(&self, case: &JumpCase) -> Result<Option<&Node>> {
        match case.target() {
            None => Ok(None),
            Some(destination) => self.find(destination).map(Some).ok_or(
                QuizError::DanglingDestination {
                    node_id: case.source,
                    case_id: case.id,
                    destination,
                },
            ),
        }
    }

    /// Check every structural invariant and report findings.
    ///
    /// Errors are invariant violations; warnings flag graphs that are legal
    /// but probably not what the editor meant.
    pub fn validate(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();

        let mut seen_questions = HashSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.position != index {
                issues.push(error(
                    node.id,
                    format!("node has position {} but sits at {index}", node.position),
                ));
            }
            if !seen_questions.insert(node.question_id.as_str()) {
                issues.push(error(
                    node.id,
                    format!("question '{}' appears more than once", node.question_id),
                ));
            }
            if node.jumps.node_id() != node.id {
                issues.push(error(node.id, "rule set belongs to another node".into()));
            }
            if !node.jumps.has_catch_all() {
                issues.push(error(
                    node.id,
                    "rule set has no unconditional or finish case".into(),
                ));
            }
            for (position, case) in node.jumps.cases().iter().enumerate() {
                if case.position != position {
                    issues.push(error(
                        node.id,
                        format!("case '{}' has position {} but sits at {position}", case.name, case.position),
                    ));
                }
                if let Some(destination) = case.target() {
                    if !ids.contains(&destination) {
                        issues.push(error(
                            node.id,
                            format!("case '{}' targets missing node {destination}", case.name),
                        ));
                    }
                }
            }
            // Learners may pick any case by name, so nothing is shadowed for them.
            let shadowed = if node.options.let_student_choose_jump {
                Vec::new()
            } else {
                node.jumps.shadowed_positions()
            };
            for position in shadowed {
                issues.push(warning(
                    node.id,
                    format!(
                        "case '{}' can never fire; an earlier catch-all always wins",
                        node.jumps.cases()[position].name
                    ),
                ));
            }
            if node.grade_weight <= 0.0 {
                issues.push(warning(node.id, "grade weight is zero".into()));
            }
        }

        let reachable = self.reachable();
        for node in self.nodes.iter().filter(|n| !reachable.contains(&n.id)) {
            issues.push(warning(
                node.id,
                format!("question '{}' is unreachable from the first node", node.question_id),
            ));
        }

        issues
    }

    /// Node ids reachable from the first node by following any case.
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let Some(first) = self.first_node() else {
            return seen;
        };
        let by_id: HashMap<NodeId, &Node> = self.nodes.iter().map(|n| (n.id, n)).collect();
        let mut queue = VecDeque::from([first.id]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = by_id.get(&id) {
                queue.extend(node.jumps.cases().iter().filter_map(|c| c.target()));
            }
        }
        seen
    }

    fn index_of(&self, node_id: NodeId) -> Result<usize> {
        self.nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or(QuizError::NodeNotFound(node_id))
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn allocate_case_id(&mut self) -> CaseId {
        let id = CaseId(self.next_case_id);
        self.next_case_id += 1;
        id
    }

    fn renumber(&mut self) {
        for (position, node) in self.nodes.iter_mut().enumerate() {
            node.position = position;
        }
    }
}

fn check_weight(grade_weight: f64) -> Result<()> {
    if grade_weight.is_finite() && grade_weight >= 0.0 {
        Ok(())
    } else {
        Err(QuizError::InvalidGradeWeight(grade_weight))
    }
}

fn error(node_id: NodeId, message: String) -> GraphIssue {
    GraphIssue {
        severity: Severity::Error,
        node_id: Some(node_id),
        message,
    }
}

fn warning(node_id: NodeId, message: String) -> GraphIssue {
    GraphIssue {
        severity: Severity::Warning,
        node_id: Some(node_id),
        message,
    }
}
