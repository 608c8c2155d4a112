//! Attempt reports with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::QuizGraph;
use crate::model::NodeId;
use crate::trace::{AttemptState, AttemptTrace};

/// Readable summary of one attempt's path and grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt_id: Uuid,
    pub quiz_id: String,
    pub quiz_name: String,
    pub user_id: String,
    pub is_preview: bool,
    pub state: AttemptState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final grade on the quiz scale, if finished.
    pub grade: Option<f64>,
    pub max_grade: f64,
    pub rows: Vec<TraceRow>,
}

/// One visited node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    pub position: usize,
    pub node_id: NodeId,
    pub question_id: String,
    pub grade_weight: f64,
    pub fraction: Option<f64>,
    /// Name of the jump case taken, if decided.
    pub jump: Option<String>,
    /// Question the jump led to, or `"end"`.
    pub destination: Option<String>,
}

impl AttemptReport {
    /// Build a report from a trace and the graph it ran against.
    ///
    /// Jump names come from the current graph; cases deleted since show as
    /// their id.
    pub fn from_trace(trace: &AttemptTrace, graph: &QuizGraph) -> Self {
        let steps = trace.steps();
        let rows = steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let jump = step.jump_case_taken.map(|case_id| {
                    graph
                        .find(step.node_id)
                        .and_then(|node| node.jumps.case_by_id(case_id))
                        .map(|case| case.name.clone())
                        .unwrap_or_else(|| case_id.to_string())
                });
                let destination = match steps.get(index + 1) {
                    Some(next) => Some(next.question_id.clone()),
                    None if jump.is_some() => Some(crate::parser::END_OF_QUIZ.to_string()),
                    None => None,
                };
                TraceRow {
                    position: step.position,
                    node_id: step.node_id,
                    question_id: step.question_id.clone(),
                    grade_weight: step.grade_weight,
                    fraction: step.grade,
                    jump,
                    destination,
                }
            })
            .collect();

        Self {
            attempt_id: trace.id(),
            quiz_id: trace.attempt.quiz_id.clone(),
            quiz_name: graph.settings.name.clone(),
            user_id: trace.attempt.user_id.clone(),
            is_preview: trace.attempt.is_preview,
            state: trace.state(),
            created_at: trace.attempt.created_at,
            finished_at: trace.attempt.finished_at,
            grade: trace.attempt.grade,
            max_grade: graph.settings.max_grade,
            rows,
        }
    }

    /// Question ids in visiting order.
    pub fn path(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.question_id.as_str()).collect()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: AttemptReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}
