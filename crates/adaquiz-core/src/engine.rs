//! Central adaptive navigation orchestrator.
//!
//! Coordinates the quiz store, question evaluator, gradebook and access
//! policy. Every attempt step runs under the store's per-attempt lock and
//! ends in one atomic commit; a step that fails before its commit leaves the
//! stored attempt untouched, so the caller can retry it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::access::AccessWindow;
use crate::error::{QuizError, Result};
use crate::grading::{compute_attempt_grade, compute_best_grade};
use crate::graph::{QuizGraph, Severity};
use crate::jump::JumpCase;
use crate::model::AttemptId;
use crate::trace::AttemptTrace;
use crate::traits::{AccessPolicy, AttemptLock, GradebookSync, QuestionEvaluator, QuizStore};

/// Configuration for the adaptive engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Push preview attempt grades to the gradebook.
    pub sync_previews: bool,
    /// Finish overdue attempts when a learner touches them.
    pub enforce_deadlines: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_previews: false,
            enforce_deadlines: true,
        }
    }
}

/// The adaptive quiz engine.
pub struct AdaptiveEngine {
    store: Arc<dyn QuizStore>,
    evaluator: Arc<dyn QuestionEvaluator>,
    gradebook: Arc<dyn GradebookSync>,
    access: Option<Arc<dyn AccessPolicy>>,
    config: EngineConfig,
}

impl AdaptiveEngine {
    pub fn new(
        store: Arc<dyn QuizStore>,
        evaluator: Arc<dyn QuestionEvaluator>,
        gradebook: Arc<dyn GradebookSync>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            gradebook,
            access: None,
            config,
        }
    }

    /// Resolve access through `policy` instead of the quiz's own settings.
    pub fn with_access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(policy);
        self
    }

    // -----------------------------------------------------------------------
    // Graph operations
    // -----------------------------------------------------------------------

    /// Store a new quiz graph.
    pub async fn create_quiz(&self, mut graph: QuizGraph) -> Result<QuizGraph> {
        if self.store.load_graph(&graph.quiz_id).await?.is_some() {
            return Err(QuizError::QuizAlreadyExists(graph.quiz_id));
        }
        check_integrity(&graph)?;
        graph.revision = 0;
        graph.revision = self.store.save_graph(&graph).await?;
        tracing::info!(quiz = %graph.quiz_id, nodes = graph.len(), "created quiz");
        Ok(graph)
    }

    pub async fn load_graph(&self, quiz_id: &str) -> Result<QuizGraph> {
        self.store
            .load_graph(quiz_id)
            .await?
            .ok_or_else(|| QuizError::QuizNotFound(quiz_id.to_string()))
    }

    /// Apply an editor change to a quiz graph as one transaction.
    ///
    /// The edit runs on a copy. Nothing is saved if it fails or leaves the
    /// graph with integrity errors, and the save is rejected with
    /// `ConcurrentModification` if another edit committed in between.
    pub async fn edit_graph<F>(&self, quiz_id: &str, edit: F) -> Result<QuizGraph>
    where
        F: FnOnce(&mut QuizGraph) -> Result<()>,
    {
        let stored = self.load_graph(quiz_id).await?;
        let mut graph = stored.clone();
        edit(&mut graph)?;
        check_integrity(&graph)?;
        graph.revision = stored.revision;
        graph.revision = self.store.save_graph(&graph).await?;
        tracing::debug!(quiz = %quiz_id, revision = graph.revision, "committed graph edit");
        Ok(graph)
    }

    /// Delete a quiz and every attempt on it.
    pub async fn delete_quiz(&self, quiz_id: &str) -> Result<()> {
        if !self.store.delete_quiz(quiz_id).await? {
            return Err(QuizError::QuizNotFound(quiz_id.to_string()));
        }
        tracing::info!(quiz = %quiz_id, "deleted quiz and its attempts");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Attempt lifecycle
    // -----------------------------------------------------------------------

    /// Start (or resume) an attempt for `user_id`.
    ///
    /// An unfinished regular attempt is resumed instead of starting another,
    /// including one committed by a concurrent start. Stale previews of the
    /// user are deleted. Previews skip access checks and may run alongside an
    /// open regular attempt.
    pub async fn start_attempt(
        &self,
        quiz_id: &str,
        user_id: &str,
        preview: bool,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let graph = self.load_graph(quiz_id).await?;
        let first = graph
            .first_node()
            .ok_or_else(|| QuizError::EmptyQuiz(quiz_id.to_string()))?;

        let existing = self.store.list_attempts(quiz_id, user_id).await?;
        for stale in existing.iter().filter(|t| t.attempt.is_preview) {
            let _lock = self.lock(stale.id()).await?;
            self.store.delete_attempt(stale.id()).await?;
            tracing::debug!(attempt = %stale.id(), "retired preview attempt");
        }

        let window = if preview {
            AccessWindow::default()
        } else {
            if let Some(open) = existing
                .iter()
                .find(|t| !t.attempt.is_preview && !t.is_finished())
            {
                if !(self.config.enforce_deadlines && open.is_overdue(now)) {
                    tracing::info!(attempt = %open.id(), user = %user_id, "resuming attempt");
                    return Ok(open.clone());
                }
                self.expire_if_overdue(open.id(), now).await?;
            }
            self.check_access(&graph, user_id, &existing, now).await?
        };

        let mut trace = AttemptTrace::start(quiz_id, user_id, preview, new_seed(), first, now);
        trace.attempt.deadline = window.deadline(now);
        match self.store.commit_attempt(&trace).await.map_err(QuizError::from) {
            Ok(version) => trace.attempt.version = version,
            Err(e) if e.is_conflict() && !preview => {
                // a concurrent start committed its attempt first
                let open = self
                    .store
                    .list_attempts(quiz_id, user_id)
                    .await?
                    .into_iter()
                    .find(|t| !t.attempt.is_preview && !t.is_finished())
                    .ok_or(e)?;
                tracing::info!(
                    attempt = %open.id(),
                    user = %user_id,
                    "resuming concurrently started attempt"
                );
                return Ok(open);
            }
            Err(e) => return Err(e),
        }
        tracing::info!(
            attempt = %trace.id(),
            quiz = %quiz_id,
            user = %user_id,
            preview,
            "started attempt"
        );
        Ok(trace)
    }

    pub async fn load_attempt(&self, attempt_id: AttemptId) -> Result<AttemptTrace> {
        self.store
            .load_attempt(attempt_id)
            .await?
            .ok_or(QuizError::AttemptNotFound(attempt_id))
    }

    /// Grade and record a response at `position`.
    ///
    /// `position` is normally the current one. In free navigation an earlier
    /// position may be redone, which discards every later node attempt.
    pub async fn submit_response(
        &self,
        attempt_id: AttemptId,
        position: usize,
        response: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let _lock = self.lock(attempt_id).await?;
        let (mut trace, graph) = self.load_open(attempt_id, now).await?;

        trace.check_submit(position, graph.settings.navigation)?;
        let question_id = trace.step(position)?.question_id.clone();

        let grade = if self.evaluator.is_manually_graded(&question_id) {
            None
        } else {
            let fraction = self
                .evaluator
                .grade(&question_id, &response)
                .await
                .map_err(QuizError::Evaluator)?;
            Some(check_fraction(fraction)?)
        };

        trace.record_response(position, response, grade, now);
        self.commit(&mut trace).await?;
        tracing::debug!(attempt = %attempt_id, position, ?grade, "recorded response");
        Ok(trace)
    }

    /// Decide the jump out of `position` and move on.
    ///
    /// Nodes that let the learner choose, and questions whose jump cannot be
    /// evaluated automatically, take the case named by `choice`. Every other
    /// node evaluates its rule set against the node attempt's raw fraction.
    ///
    /// Repeating the advance that finished the attempt returns the finished
    /// trace and retries the gradebook sync.
    pub async fn confirm_advance(
        &self,
        attempt_id: AttemptId,
        position: usize,
        choice: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let _lock = self.lock(attempt_id).await?;
        let trace = self.load_attempt(attempt_id).await?;
        if finished_by_advance_at(&trace, position) {
            tracing::debug!(attempt = %attempt_id, position, "attempt already finished here");
            if self.syncs(&trace) {
                self.sync_quiz_grade(&trace.attempt.quiz_id, &trace.attempt.user_id)
                    .await?;
            }
            return Ok(trace);
        }
        let (mut trace, graph) = self.open(trace, now).await?;

        let step = trace.check_advance(position)?.clone();
        let Some(node) = graph.find(step.node_id) else {
            tracing::warn!(
                attempt = %attempt_id,
                node = %step.node_id,
                "current node was deleted, finishing attempt"
            );
            trace.force_finish(now)?;
            self.finalize(&mut trace, &graph).await?;
            return Ok(trace);
        };

        let manual = node.options.let_student_choose_jump
            || !self.evaluator.requires_automatic_jump(&step.question_id);

        let case: JumpCase = if manual {
            let name = choice.ok_or(QuizError::JumpChoiceRequired { node_id: node.id })?;
            node.jumps
                .case_by_name(name)
                .cloned()
                .ok_or_else(|| QuizError::UnknownJumpChoice {
                    node_id: node.id,
                    choice: name.to_string(),
                })?
        } else {
            if choice.is_some() {
                return Err(QuizError::JumpChoiceNotAllowed { node_id: node.id });
            }
            let fraction = step.grade.ok_or(QuizError::GradePending { position })?;
            node.jumps
                .evaluate(fraction)
                .inspect_err(|e| tracing::error!(attempt = %attempt_id, "{e}"))?
                .clone()
        };

        let destination = graph
            .resolve_destination(&case)
            .inspect_err(|e| tracing::error!(attempt = %attempt_id, "{e}"))?;

        tracing::debug!(
            attempt = %attempt_id,
            position,
            case = %case.name,
            destination = ?destination.map(|n| n.id),
            "jump resolved"
        );

        if trace.advance(&case, destination, now) {
            self.finalize(&mut trace, &graph).await?;
        } else {
            self.commit(&mut trace).await?;
        }
        Ok(trace)
    }

    /// Finish an attempt now, regardless of the current node.
    pub async fn force_finish(
        &self,
        attempt_id: AttemptId,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let _lock = self.lock(attempt_id).await?;
        let mut trace = self.load_attempt(attempt_id).await?;
        let graph = self.load_graph(&trace.attempt.quiz_id).await?;
        trace.force_finish(now)?;
        self.finalize(&mut trace, &graph).await?;
        Ok(trace)
    }

    /// Finish the attempt if its deadline has passed. Returns whether it did.
    pub async fn expire_if_overdue(&self, attempt_id: AttemptId, now: DateTime<Utc>) -> Result<bool> {
        let _lock = self.lock(attempt_id).await?;
        let mut trace = self.load_attempt(attempt_id).await?;
        if !trace.is_overdue(now) {
            return Ok(false);
        }
        let graph = self.load_graph(&trace.attempt.quiz_id).await?;
        trace.force_finish(now)?;
        self.finalize(&mut trace, &graph).await?;
        tracing::info!(attempt = %attempt_id, "attempt expired");
        Ok(true)
    }

    /// Delete an attempt and resync the learner's quiz grade.
    pub async fn delete_attempt(&self, attempt_id: AttemptId) -> Result<()> {
        let trace = {
            let _lock = self.lock(attempt_id).await?;
            let trace = self.load_attempt(attempt_id).await?;
            self.store.delete_attempt(attempt_id).await?;
            trace
        };
        tracing::info!(attempt = %attempt_id, "deleted attempt");
        if self.syncs(&trace) {
            self.sync_quiz_grade(&trace.attempt.quiz_id, &trace.attempt.user_id)
                .await?;
        }
        Ok(())
    }

    /// Re-evaluate every stored response of an attempt.
    ///
    /// The path already taken is history and is not re-decided; only grades
    /// change. Manually graded questions keep their grades.
    pub async fn regrade_attempt(
        &self,
        attempt_id: AttemptId,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let _lock = self.lock(attempt_id).await?;
        let mut trace = self.load_attempt(attempt_id).await?;
        let graph = self.load_graph(&trace.attempt.quiz_id).await?;

        let mut regraded = Vec::new();
        for step in trace.steps() {
            let Some(response) = &step.response else {
                continue;
            };
            if self.evaluator.is_manually_graded(&step.question_id) {
                continue;
            }
            let fraction = self
                .evaluator
                .grade(&step.question_id, response)
                .await
                .map_err(QuizError::Evaluator)?;
            regraded.push((step.position, check_fraction(fraction)?));
        }
        for (position, fraction) in regraded {
            trace.set_grade(position, fraction, now)?;
        }

        if trace.is_finished() {
            self.finalize(&mut trace, &graph).await?;
        } else {
            self.commit(&mut trace).await?;
        }
        tracing::info!(attempt = %attempt_id, grade = ?trace.attempt.grade, "regraded attempt");
        Ok(trace)
    }

    /// Record a grade for a manually graded node attempt.
    pub async fn grade_manually(
        &self,
        attempt_id: AttemptId,
        position: usize,
        fraction: f64,
        now: DateTime<Utc>,
    ) -> Result<AttemptTrace> {
        let fraction = check_fraction(fraction)?;
        let _lock = self.lock(attempt_id).await?;
        let mut trace = self.load_attempt(attempt_id).await?;
        let graph = self.load_graph(&trace.attempt.quiz_id).await?;

        if trace.step(position)?.response.is_none() {
            return Err(QuizError::InvalidTransition {
                attempt_id,
                state: trace.state(),
                action: "grade an unanswered node attempt",
            });
        }
        trace.set_grade(position, fraction, now)?;

        if trace.is_finished() {
            self.finalize(&mut trace, &graph).await?;
        } else {
            self.commit(&mut trace).await?;
        }
        Ok(trace)
    }

    /// The learner's quiz grade under the quiz's grade method.
    pub async fn quiz_grade(&self, quiz_id: &str, user_id: &str) -> Result<Option<f64>> {
        let graph = self.load_graph(quiz_id).await?;
        let attempts = self.store.list_attempts(quiz_id, user_id).await?;
        Ok(compute_best_grade(
            &attempts,
            graph.settings.max_grade,
            graph.settings.grade_method,
        ))
    }

    /// Push the learner's current quiz grade to the gradebook.
    pub async fn sync_quiz_grade(&self, quiz_id: &str, user_id: &str) -> Result<Option<f64>> {
        let grade = self.quiz_grade(quiz_id, user_id).await?;
        self.gradebook
            .sync_grade(quiz_id, user_id, grade)
            .await
            .map_err(QuizError::Gradebook)?;
        tracing::debug!(quiz = %quiz_id, user = %user_id, ?grade, "synced quiz grade");
        Ok(grade)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn lock(&self, attempt_id: AttemptId) -> Result<AttemptLock> {
        Ok(self.store.lock_attempt(attempt_id).await?)
    }

    /// Load an attempt that is still open, plus its graph. Overdue attempts
    /// are finished on the spot.
    async fn load_open(
        &self,
        attempt_id: AttemptId,
        now: DateTime<Utc>,
    ) -> Result<(AttemptTrace, QuizGraph)> {
        let trace = self.load_attempt(attempt_id).await?;
        self.open(trace, now).await
    }

    async fn open(
        &self,
        mut trace: AttemptTrace,
        now: DateTime<Utc>,
    ) -> Result<(AttemptTrace, QuizGraph)> {
        let attempt_id = trace.id();
        if trace.is_finished() {
            return Err(QuizError::AttemptAlreadyFinished(attempt_id));
        }
        let graph = self.load_graph(&trace.attempt.quiz_id).await?;
        if self.config.enforce_deadlines && trace.is_overdue(now) {
            tracing::info!(attempt = %attempt_id, "attempt overdue, finishing");
            trace.force_finish(now)?;
            self.finalize(&mut trace, &graph).await?;
            return Err(QuizError::AttemptAlreadyFinished(attempt_id));
        }
        Ok((trace, graph))
    }

    async fn commit(&self, trace: &mut AttemptTrace) -> Result<()> {
        trace.attempt.version = self.store.commit_attempt(trace).await?;
        Ok(())
    }

    /// Grade a finished attempt, commit it, then resync the quiz grade.
    async fn finalize(&self, trace: &mut AttemptTrace, graph: &QuizGraph) -> Result<()> {
        let grade = compute_attempt_grade(trace.steps(), graph.settings.max_grade);
        trace.attempt.grade = Some(grade);
        self.commit(trace).await?;
        tracing::info!(attempt = %trace.id(), grade, "attempt finished");
        if self.syncs(trace) {
            self.sync_quiz_grade(&trace.attempt.quiz_id, &trace.attempt.user_id)
                .await?;
        }
        Ok(())
    }

    fn syncs(&self, trace: &AttemptTrace) -> bool {
        !trace.attempt.is_preview || self.config.sync_previews
    }

    async fn check_access(
        &self,
        graph: &QuizGraph,
        user_id: &str,
        existing: &[AttemptTrace],
        now: DateTime<Utc>,
    ) -> Result<AccessWindow> {
        let quiz_id = graph.quiz_id.as_str();
        let (window, allowed) = match &self.access {
            Some(policy) => {
                let window = policy
                    .effective_overrides(quiz_id, user_id)
                    .await
                    .map_err(QuizError::AccessPolicy)?;
                let allowed = policy
                    .is_attempt_allowed(quiz_id, user_id, now)
                    .await
                    .map_err(QuizError::AccessPolicy)?;
                (window, allowed)
            }
            None => {
                let window = graph.settings.access.clone();
                let allowed = window.is_open(now);
                (window, allowed)
            }
        };

        let denied = |reason: String| QuizError::AttemptNotAllowed {
            quiz_id: quiz_id.to_string(),
            user_id: user_id.to_string(),
            reason,
        };
        if !allowed {
            let reason = window
                .closed_reason(now)
                .unwrap_or_else(|| "access denied by policy".to_string());
            return Err(denied(reason));
        }
        if let Some(max) = window.max_attempts {
            let used = existing.iter().filter(|t| !t.attempt.is_preview).count();
            if used >= max as usize {
                return Err(denied(format!("all {max} attempts used")));
            }
        }
        Ok(window)
    }
}

fn check_integrity(graph: &QuizGraph) -> Result<()> {
    let errors: Vec<String> = graph
        .validate()
        .into_iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| i.message)
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(QuizError::Integrity(errors.join("; ")))
    }
}

/// The attempt was finished by confirming the jump out of `position`.
fn finished_by_advance_at(trace: &AttemptTrace, position: usize) -> bool {
    trace.is_finished()
        && trace.current_position() == position
        && trace.current().jump_case_taken.is_some()
}

fn check_fraction(fraction: f64) -> Result<f64> {
    if fraction.is_finite() && (0.0..=1.0).contains(&fraction) {
        Ok(fraction)
    } else {
        Err(QuizError::InvalidFraction(fraction))
    }
}

fn new_seed() -> u64 {
    rand::random::<u64>()
}
