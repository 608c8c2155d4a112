//! Scripted collaborators for simulations and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use adaquiz_core::traits::{GradebookSync, QuestionEvaluator};

/// An evaluator that reads the fraction straight out of the response.
///
/// Accepted responses: a JSON number, a numeric string, or an object with a
/// numeric `"fraction"` field. Questions can be marked as manually graded,
/// as needing a learner-chosen jump, or as failing.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    manual: HashSet<String>,
    learner_choice: HashSet<String>,
    failing: HashSet<String>,
    call_count: AtomicU32,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `question_id` like an essay: graded later, jump chosen by the learner.
    pub fn with_manual(mut self, question_id: &str) -> Self {
        self.manual.insert(question_id.to_string());
        self
    }

    /// Grade automatically but let the learner choose the jump.
    pub fn with_learner_choice(mut self, question_id: &str) -> Self {
        self.learner_choice.insert(question_id.to_string());
        self
    }

    /// Fail every grading call for `question_id`.
    pub fn failing_on(mut self, question_id: &str) -> Self {
        self.failing.insert(question_id.to_string());
        self
    }

    /// Number of grading calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

/// Extract the fraction from a scripted response.
pub fn response_fraction(response: &Value) -> anyhow::Result<f64> {
    let value = match response {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => map.get("fraction").and_then(Value::as_f64),
        _ => None,
    };
    value.ok_or_else(|| anyhow::anyhow!("response carries no fraction: {response}"))
}

#[async_trait]
impl QuestionEvaluator for ScriptedEvaluator {
    async fn grade(&self, question_id: &str, response: &Value) -> anyhow::Result<f64> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(question_id) {
            anyhow::bail!("evaluator unavailable for question '{question_id}'");
        }
        response_fraction(response)
    }

    fn is_manually_graded(&self, question_id: &str) -> bool {
        self.manual.contains(question_id)
    }

    fn requires_automatic_jump(&self, question_id: &str) -> bool {
        !self.manual.contains(question_id) && !self.learner_choice.contains(question_id)
    }
}

/// One grade pushed to the gradebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSync {
    pub quiz_id: String,
    pub user_id: String,
    pub grade: Option<f64>,
}

/// A gradebook that remembers every sync.
#[derive(Debug, Default)]
pub struct RecordingGradebook {
    records: Mutex<Vec<GradeSync>>,
    failing: AtomicBool,
}

impl RecordingGradebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent syncs fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub async fn records(&self) -> Vec<GradeSync> {
        self.records.lock().await.clone()
    }

    /// The most recent grade synced for a learner.
    pub async fn last_grade(&self, quiz_id: &str, user_id: &str) -> Option<Option<f64>> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| r.quiz_id == quiz_id && r.user_id == user_id)
            .map(|r| r.grade)
    }
}

#[async_trait]
impl GradebookSync for RecordingGradebook {
    async fn sync_grade(
        &self,
        quiz_id: &str,
        user_id: &str,
        grade: Option<f64>,
    ) -> anyhow::Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            anyhow::bail!("gradebook unreachable");
        }
        self.records.lock().await.push(GradeSync {
            quiz_id: quiz_id.to_string(),
            user_id: user_id.to_string(),
            grade,
        });
        Ok(())
    }
}
