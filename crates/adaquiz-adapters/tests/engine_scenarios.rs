//! End-to-end navigation scenarios against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use adaquiz_adapters::{MemoryStore, RecordingGradebook, ScriptedEvaluator};
use adaquiz_core::access::{AccessOverride, AccessWindow, OverridePolicy};
use adaquiz_core::engine::{AdaptiveEngine, EngineConfig};
use adaquiz_core::grading::GradeMethod;
use adaquiz_core::graph::{JumpSpec, QuizGraph};
use adaquiz_core::jump::{Comparator, JumpCondition};
use adaquiz_core::model::{AttemptId, NavigationMode, NodeId, NodeOptions, QuizSettings};
use adaquiz_core::trace::{AttemptState, AttemptTrace};
use adaquiz_core::traits::{AttemptLock, QuizStore};
use adaquiz_core::QuizError;

struct Harness {
    engine: Arc<AdaptiveEngine>,
    gradebook: Arc<RecordingGradebook>,
    evaluator: Arc<ScriptedEvaluator>,
}

fn harness(evaluator: ScriptedEvaluator) -> Harness {
    let evaluator = Arc::new(evaluator);
    let gradebook = Arc::new(RecordingGradebook::new());
    let engine = AdaptiveEngine::new(
        Arc::new(MemoryStore::new()),
        evaluator.clone(),
        gradebook.clone(),
        EngineConfig::default(),
    );
    Harness {
        engine: Arc::new(engine),
        gradebook,
        evaluator,
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

fn chain(quiz_id: &str, questions: &[(&str, f64)]) -> QuizGraph {
    let mut graph = QuizGraph::new(quiz_id, QuizSettings::named(quiz_id));
    for (question, weight) in questions {
        graph.add_question(question, *weight).unwrap();
    }
    graph
}

fn ids(graph: &QuizGraph) -> Vec<NodeId> {
    graph.nodes().iter().map(|n| n.id).collect()
}

/// Node 0 branches on a threshold; `threshold_first` decides case order.
fn branching(threshold_first: bool) -> QuizGraph {
    let mut graph = chain("branching", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]);
    let n = ids(&graph);
    let threshold = JumpSpec {
        condition: JumpCondition::threshold(Comparator::LessThan, 0.5),
        destination: Some(n[2]),
        name: Some("remedial".into()),
    };
    let unconditional = JumpSpec {
        condition: JumpCondition::Unconditional,
        destination: Some(n[1]),
        name: Some("next".into()),
    };
    let specs = if threshold_first {
        vec![threshold, unconditional]
    } else {
        vec![unconditional, threshold]
    };
    graph.replace_jumps(n[0], specs).unwrap();
    graph
}

async fn answer_and_advance(
    engine: &AdaptiveEngine,
    attempt_id: AttemptId,
    position: usize,
    fraction: f64,
) -> AttemptTrace {
    engine
        .submit_response(attempt_id, position, json!(fraction), now())
        .await
        .unwrap();
    engine
        .confirm_advance(attempt_id, position, None, now())
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_a_default_chain_advances_to_next_node() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h
        .engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]))
        .await
        .unwrap();
    let n = ids(&graph);

    let trace = h.engine.start_attempt("chain", "alice", false, now()).await.unwrap();
    assert_eq!(trace.current().node_id, n[0]);

    let trace = answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;
    assert_eq!(trace.state(), AttemptState::Answering);
    assert_eq!(trace.steps().len(), 2);
    assert_eq!(trace.current().position, 1);
    assert_eq!(trace.current().node_id, n[1]);
    assert!(trace.steps()[0].jump_case_taken.is_some());
}

#[tokio::test]
async fn scenario_b_threshold_before_unconditional_wins() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h.engine.create_quiz(branching(true)).await.unwrap();
    let n = ids(&graph);

    let trace = h.engine.start_attempt("branching", "alice", false, now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, trace.id(), 0, 0.3).await;
    assert_eq!(trace.current().node_id, n[2]);
}

#[tokio::test]
async fn scenario_c_unconditional_first_shadows_threshold() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h.engine.create_quiz(branching(false)).await.unwrap();
    let n = ids(&graph);

    let trace = h.engine.start_attempt("branching", "alice", false, now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, trace.id(), 0, 0.3).await;
    assert_eq!(trace.current().node_id, n[1]);
}

#[tokio::test]
async fn scenario_d_deleting_referenced_node_ends_quiz_at_source() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h
        .engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]))
        .await
        .unwrap();
    let n = ids(&graph);

    let edited = h
        .engine
        .edit_graph("chain", |g| g.delete_node(n[1]).map(|_| ()))
        .await
        .unwrap();

    assert_eq!(edited.revision, graph.revision + 1);
    let positions: Vec<usize> = edited.nodes().iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![0, 1]);
    assert_eq!(edited.node(n[0]).unwrap().jumps.cases()[0].destination, None);

    let trace = h.engine.start_attempt("chain", "alice", false, now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;
    assert!(trace.is_finished());
}

#[tokio::test]
async fn scenario_e_attempt_grade_over_visited_path() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("weighted", &[("q0", 1.0), ("q1", 1.0), ("q2", 2.0)]);
    let n = ids(&graph);
    graph
        .replace_jumps(
            n[0],
            vec![
                JumpSpec {
                    condition: JumpCondition::threshold(Comparator::GreaterThan, 0.5),
                    destination: Some(n[2]),
                    name: None,
                },
                JumpSpec {
                    condition: JumpCondition::Unconditional,
                    destination: Some(n[1]),
                    name: None,
                },
            ],
        )
        .unwrap();
    h.engine.create_quiz(graph).await.unwrap();

    let trace = h.engine.start_attempt("weighted", "alice", false, now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, trace.id(), 0, 0.8).await;
    assert_eq!(trace.current().node_id, n[2]);
    let trace = answer_and_advance(&h.engine, trace.id(), 1, 0.4).await;

    assert!(trace.is_finished());
    assert_eq!(trace.attempt.grade, Some(5.33));
    assert_eq!(h.gradebook.last_grade("weighted", "alice").await, Some(Some(5.33)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_f_concurrent_advances_append_one_node_attempt() {
    let h = harness(ScriptedEvaluator::new());
    h.engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]))
        .await
        .unwrap();

    for round in 0..10 {
        let user = format!("user-{round}");
        let trace = h.engine.start_attempt("chain", &user, false, now()).await.unwrap();
        let attempt_id = trace.id();
        h.engine
            .submit_response(attempt_id, 0, json!(1.0), now())
            .await
            .unwrap();

        let tasks = (0..2).map(|_| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move { engine.confirm_advance(attempt_id, 0, None, now()).await })
        });
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "round {round}: {results:?}");
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(err.is_conflict(), "round {round}: unexpected {err}");
        }

        let stored = h.engine.load_attempt(attempt_id).await.unwrap();
        let positions: Vec<usize> = stored.steps().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }
}

/// Store whose attempt listing stalls after reading, so concurrent starts
/// both see the learner without an open attempt.
struct SlowListing(MemoryStore);

#[async_trait]
impl QuizStore for SlowListing {
    async fn load_graph(&self, quiz_id: &str) -> anyhow::Result<Option<QuizGraph>> {
        self.0.load_graph(quiz_id).await
    }

    async fn save_graph(&self, graph: &QuizGraph) -> anyhow::Result<u64> {
        self.0.save_graph(graph).await
    }

    async fn delete_quiz(&self, quiz_id: &str) -> anyhow::Result<bool> {
        self.0.delete_quiz(quiz_id).await
    }

    async fn list_quizzes(&self) -> anyhow::Result<Vec<String>> {
        self.0.list_quizzes().await
    }

    async fn load_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<Option<AttemptTrace>> {
        self.0.load_attempt(attempt_id).await
    }

    async fn list_attempts(
        &self,
        quiz_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Vec<AttemptTrace>> {
        let attempts = self.0.list_attempts(quiz_id, user_id).await?;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(attempts)
    }

    async fn commit_attempt(&self, trace: &AttemptTrace) -> anyhow::Result<u64> {
        self.0.commit_attempt(trace).await
    }

    async fn delete_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<bool> {
        self.0.delete_attempt(attempt_id).await
    }

    async fn lock_attempt(&self, attempt_id: AttemptId) -> anyhow::Result<AttemptLock> {
        self.0.lock_attempt(attempt_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_share_one_open_attempt() {
    let store = Arc::new(SlowListing(MemoryStore::new()));
    let engine = Arc::new(AdaptiveEngine::new(
        store.clone(),
        Arc::new(ScriptedEvaluator::new()),
        Arc::new(RecordingGradebook::new()),
        EngineConfig::default(),
    ));
    let mut graph = chain("race", &[("q0", 1.0), ("q1", 1.0)]);
    graph.settings.access.max_attempts = Some(1);
    engine.create_quiz(graph).await.unwrap();

    for round in 0..5 {
        let user = format!("user-{round}");
        let tasks = (0..2).map(|_| {
            let engine = Arc::clone(&engine);
            let user = user.clone();
            tokio::spawn(async move { engine.start_attempt("race", &user, false, now()).await })
        });
        let started: Vec<AttemptTrace> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        assert_eq!(started[0].id(), started[1].id(), "round {round}");

        let stored = store.0.list_attempts("race", &user).await.unwrap();
        assert_eq!(stored.len(), 1, "round {round}: {stored:?}");
        assert!(!stored[0].is_finished());
    }
}

#[tokio::test]
async fn sequential_navigation_rejects_going_back() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("seq", &[("q0", 1.0), ("q1", 1.0)]);
    graph.settings.navigation = NavigationMode::Sequential;
    h.engine.create_quiz(graph).await.unwrap();

    let trace = h.engine.start_attempt("seq", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;

    let err = h
        .engine
        .submit_response(trace.id(), 0, json!(0.2), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::OutOfSequenceNavigation { requested: 0, current: 1, .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn free_navigation_redo_discards_later_node_attempts() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h.engine.create_quiz(branching(true)).await.unwrap();
    let n = ids(&graph);

    let trace = h.engine.start_attempt("branching", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 0.9).await;

    let redone = h
        .engine
        .submit_response(trace.id(), 0, json!(0.1), now())
        .await
        .unwrap();
    assert_eq!(redone.steps().len(), 1);
    assert_eq!(redone.state(), AttemptState::Reviewing);

    let trace = h
        .engine
        .confirm_advance(trace.id(), 0, None, now())
        .await
        .unwrap();
    assert_eq!(trace.current().node_id, n[2]);
    assert_eq!(trace.steps().len(), 2);
}

#[tokio::test]
async fn finished_attempt_rejects_further_steps() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("one", &[("q0", 1.0)])).await.unwrap();

    let trace = h.engine.start_attempt("one", "alice", false, now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;
    assert!(trace.is_finished());
    assert_eq!(trace.attempt.grade, Some(10.0));

    let err = h
        .engine
        .submit_response(trace.id(), 0, json!(1.0), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::AttemptAlreadyFinished(_)));
    assert!(h.engine.force_finish(trace.id(), now()).await.is_err());
}

#[tokio::test]
async fn learner_choice_nodes_take_the_named_case() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = branching(true);
    let n = ids(&graph);
    graph
        .set_options(
            n[0],
            NodeOptions {
                let_student_choose_jump: true,
                ..Default::default()
            },
        )
        .unwrap();
    h.engine.create_quiz(graph).await.unwrap();

    let trace = h.engine.start_attempt("branching", "alice", false, now()).await.unwrap();
    let id = trace.id();
    h.engine.submit_response(id, 0, json!(0.1), now()).await.unwrap();

    let err = h.engine.confirm_advance(id, 0, None, now()).await.unwrap_err();
    assert!(matches!(err, QuizError::JumpChoiceRequired { .. }));
    let err = h
        .engine
        .confirm_advance(id, 0, Some("sideways"), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::UnknownJumpChoice { .. }));

    // 0.1 would pick "remedial" automatically; the learner overrides it.
    let trace = h
        .engine
        .confirm_advance(id, 0, Some("next"), now())
        .await
        .unwrap();
    assert_eq!(trace.current().node_id, n[1]);
}

#[tokio::test]
async fn automatic_nodes_refuse_a_choice() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(branching(true)).await.unwrap();

    let trace = h.engine.start_attempt("branching", "alice", false, now()).await.unwrap();
    h.engine
        .submit_response(trace.id(), 0, json!(0.7), now())
        .await
        .unwrap();
    let err = h
        .engine
        .confirm_advance(trace.id(), 0, Some("remedial"), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::JumpChoiceNotAllowed { .. }));
}

#[tokio::test]
async fn manually_graded_question_is_graded_later() {
    let h = harness(ScriptedEvaluator::new().with_manual("q0"));
    let graph = h
        .engine
        .create_quiz(chain("essay", &[("q0", 1.0), ("q1", 1.0)]))
        .await
        .unwrap();
    let n = ids(&graph);
    let choice = graph.node(n[0]).unwrap().jumps.cases()[0].name.clone();

    let trace = h.engine.start_attempt("essay", "alice", false, now()).await.unwrap();
    let id = trace.id();
    let trace = h
        .engine
        .submit_response(id, 0, json!({"text": "an essay"}), now())
        .await
        .unwrap();
    assert_eq!(trace.steps()[0].grade, None);
    assert_eq!(h.evaluator.call_count(), 0);

    h.engine.confirm_advance(id, 0, Some(&choice), now()).await.unwrap();
    let trace = answer_and_advance(&h.engine, id, 1, 1.0).await;
    assert_eq!(trace.attempt.grade, Some(5.0));

    let trace = h.engine.grade_manually(id, 0, 0.5, now()).await.unwrap();
    assert_eq!(trace.attempt.grade, Some(7.5));
    assert_eq!(h.gradebook.last_grade("essay", "alice").await, Some(Some(7.5)));
}

#[tokio::test]
async fn evaluator_failure_leaves_attempt_untouched() {
    let h = harness(ScriptedEvaluator::new().failing_on("q0"));
    h.engine.create_quiz(chain("flaky", &[("q0", 1.0)])).await.unwrap();

    let trace = h.engine.start_attempt("flaky", "alice", false, now()).await.unwrap();
    let err = h
        .engine
        .submit_response(trace.id(), 0, json!(1.0), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::Evaluator(_)));

    let stored = h.engine.load_attempt(trace.id()).await.unwrap();
    assert_eq!(stored, trace);
}

#[tokio::test]
async fn invalid_fraction_is_rejected() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("one", &[("q0", 1.0)])).await.unwrap();
    let trace = h.engine.start_attempt("one", "alice", false, now()).await.unwrap();
    let err = h
        .engine
        .submit_response(trace.id(), 0, json!(1.5), now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::InvalidFraction(_)));
}

#[tokio::test]
async fn gradebook_failure_surfaces_after_commit() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("one", &[("q0", 1.0)])).await.unwrap();
    let trace = h.engine.start_attempt("one", "alice", false, now()).await.unwrap();
    h.engine
        .submit_response(trace.id(), 0, json!(0.5), now())
        .await
        .unwrap();

    h.gradebook.set_failing(true);
    let err = h
        .engine
        .confirm_advance(trace.id(), 0, None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::Gradebook(_)));
    assert!(h.engine.load_attempt(trace.id()).await.unwrap().is_finished());

    h.gradebook.set_failing(false);
    let retried = h
        .engine
        .confirm_advance(trace.id(), 0, None, now())
        .await
        .unwrap();
    assert!(retried.is_finished());
    assert_eq!(retried.attempt.grade, Some(5.0));
    assert_eq!(retried.steps().len(), 1);
    assert_eq!(h.gradebook.last_grade("one", "alice").await, Some(Some(5.0)));

    let grade = h.engine.sync_quiz_grade("one", "alice").await.unwrap();
    assert_eq!(grade, Some(5.0));
}

#[tokio::test]
async fn start_resumes_unfinished_and_enforces_max_attempts() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("limited", &[("q0", 1.0)]);
    graph.settings.access.max_attempts = Some(1);
    h.engine.create_quiz(graph).await.unwrap();

    let first = h.engine.start_attempt("limited", "alice", false, now()).await.unwrap();
    let again = h.engine.start_attempt("limited", "alice", false, now()).await.unwrap();
    assert_eq!(first.id(), again.id());

    answer_and_advance(&h.engine, first.id(), 0, 1.0).await;
    let err = h
        .engine
        .start_attempt("limited", "alice", false, now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::AttemptNotAllowed { .. }));

    // previews skip the limit
    assert!(h.engine.start_attempt("limited", "alice", true, now()).await.is_ok());
}

#[tokio::test]
async fn new_preview_retires_the_previous_one() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("p", &[("q0", 1.0)])).await.unwrap();

    let old = h.engine.start_attempt("p", "instructor", true, now()).await.unwrap();
    let new = h.engine.start_attempt("p", "instructor", true, now()).await.unwrap();
    assert_ne!(old.id(), new.id());
    assert!(matches!(
        h.engine.load_attempt(old.id()).await,
        Err(QuizError::AttemptNotFound(_))
    ));

    answer_and_advance(&h.engine, new.id(), 0, 1.0).await;
    assert!(h.gradebook.records().await.is_empty());
}

#[tokio::test]
async fn preview_runs_alongside_open_attempt() {
    let h = harness(ScriptedEvaluator::new());
    h.engine
        .create_quiz(chain("side", &[("q0", 1.0), ("q1", 1.0)]))
        .await
        .unwrap();

    let regular = h.engine.start_attempt("side", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, regular.id(), 0, 1.0).await;

    let preview = h.engine.start_attempt("side", "alice", true, now()).await.unwrap();
    assert_ne!(preview.id(), regular.id());
    answer_and_advance(&h.engine, preview.id(), 0, 0.0).await;

    let resumed = h.engine.start_attempt("side", "alice", false, now()).await.unwrap();
    assert_eq!(resumed.id(), regular.id());
    assert_eq!(resumed.steps().len(), 2);
    assert_eq!(resumed.steps()[0].grade, Some(1.0));
    assert!(h.gradebook.records().await.is_empty());
}

#[tokio::test]
async fn closed_quiz_refuses_new_attempts() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("closed", &[("q0", 1.0)]);
    graph.settings.access = AccessWindow {
        time_close: Some(now() - Duration::hours(1)),
        ..Default::default()
    };
    h.engine.create_quiz(graph).await.unwrap();

    let err = h
        .engine
        .start_attempt("closed", "alice", false, now())
        .await
        .unwrap_err();
    match err {
        QuizError::AttemptNotAllowed { reason, .. } => assert!(reason.contains("closed")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn access_policy_overrides_quiz_settings() {
    let evaluator = Arc::new(ScriptedEvaluator::new());
    let gradebook = Arc::new(RecordingGradebook::new());
    let mut policy = OverridePolicy::new();
    policy.set_quiz(
        "timed",
        AccessWindow {
            time_limit_secs: Some(60),
            ..Default::default()
        },
    );
    policy.set_user_override(
        "timed",
        "bob",
        AccessOverride {
            time_limit_secs: Some(None),
            ..Default::default()
        },
    );
    let engine = AdaptiveEngine::new(
        Arc::new(MemoryStore::new()),
        evaluator,
        gradebook,
        EngineConfig::default(),
    )
    .with_access_policy(Arc::new(policy));
    engine.create_quiz(chain("timed", &[("q0", 1.0)])).await.unwrap();

    let alice = engine.start_attempt("timed", "alice", false, now()).await.unwrap();
    let bob = engine.start_attempt("timed", "bob", false, now()).await.unwrap();
    assert_eq!(alice.attempt.deadline, Some(now() + Duration::seconds(60)));
    assert_eq!(bob.attempt.deadline, None);
}

#[tokio::test]
async fn oversized_time_limit_starts_unbounded_attempt() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("endless", &[("q0", 1.0)]);
    graph.settings.access.time_limit_secs = Some(u64::MAX / 2);
    h.engine.create_quiz(graph).await.unwrap();

    let trace = h.engine.start_attempt("endless", "alice", false, now()).await.unwrap();
    assert_eq!(trace.attempt.deadline, None);
    assert!(!trace.is_overdue(now() + Duration::days(3650)));
}

#[tokio::test]
async fn overdue_attempt_expires() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("timed", &[("q0", 1.0), ("q1", 1.0)]);
    graph.settings.access.time_limit_secs = Some(600);
    h.engine.create_quiz(graph).await.unwrap();

    let trace = h.engine.start_attempt("timed", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;

    assert!(!h.engine.expire_if_overdue(trace.id(), now()).await.unwrap());
    let late = now() + Duration::minutes(11);
    let err = h
        .engine
        .submit_response(trace.id(), 1, json!(1.0), late)
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::AttemptAlreadyFinished(_)));

    let stored = h.engine.load_attempt(trace.id()).await.unwrap();
    assert!(stored.is_finished());
    assert_eq!(stored.attempt.grade, Some(5.0));
    assert!(!h.engine.expire_if_overdue(trace.id(), late).await.unwrap());
}

#[tokio::test]
async fn force_finish_grades_visited_path() {
    let h = harness(ScriptedEvaluator::new());
    h.engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]))
        .await
        .unwrap();

    let trace = h.engine.start_attempt("chain", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 0.6).await;
    let trace = h.engine.force_finish(trace.id(), now()).await.unwrap();

    assert!(trace.is_finished());
    assert_eq!(trace.steps().len(), 2);
    assert_eq!(trace.current().jump_case_taken, None);
    assert_eq!(trace.attempt.grade, Some(3.0));
}

#[tokio::test]
async fn deleted_current_node_finishes_attempt() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h
        .engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0), ("q2", 1.0)]))
        .await
        .unwrap();
    let n = ids(&graph);

    let trace = h.engine.start_attempt("chain", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;
    h.engine
        .submit_response(trace.id(), 1, json!(1.0), now())
        .await
        .unwrap();
    h.engine
        .edit_graph("chain", |g| g.delete_node(n[1]).map(|_| ()))
        .await
        .unwrap();

    let trace = h
        .engine
        .confirm_advance(trace.id(), 1, None, now())
        .await
        .unwrap();
    assert!(trace.is_finished());
    assert_eq!(trace.steps()[1].question_id, "q1");
    assert_eq!(trace.attempt.grade, Some(10.0));
}

#[tokio::test]
async fn quiz_grade_follows_grade_method() {
    let h = harness(ScriptedEvaluator::new());
    let mut graph = chain("avg", &[("q0", 1.0)]);
    graph.settings.grade_method = GradeMethod::Average;
    h.engine.create_quiz(graph).await.unwrap();

    for fraction in [0.4, 0.9] {
        let trace = h.engine.start_attempt("avg", "alice", false, now()).await.unwrap();
        answer_and_advance(&h.engine, trace.id(), 0, fraction).await;
    }
    assert_eq!(h.engine.quiz_grade("avg", "alice").await.unwrap(), Some(6.5));
    assert_eq!(h.gradebook.last_grade("avg", "alice").await, Some(Some(6.5)));
    assert_eq!(h.engine.quiz_grade("avg", "bob").await.unwrap(), None);
}

#[tokio::test]
async fn deleting_an_attempt_resyncs_grade() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("one", &[("q0", 1.0)])).await.unwrap();
    let trace = h.engine.start_attempt("one", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 1.0).await;

    h.engine.delete_attempt(trace.id()).await.unwrap();
    assert_eq!(h.gradebook.last_grade("one", "alice").await, Some(None));
    assert!(matches!(
        h.engine.delete_attempt(trace.id()).await,
        Err(QuizError::AttemptNotFound(_))
    ));
}

#[tokio::test]
async fn regrade_recomputes_and_resyncs() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("one", &[("q0", 2.0)])).await.unwrap();
    let trace = h.engine.start_attempt("one", "alice", false, now()).await.unwrap();
    answer_and_advance(&h.engine, trace.id(), 0, 0.25).await;
    let synced = h.gradebook.records().await.len();

    let regraded = h.engine.regrade_attempt(trace.id(), now()).await.unwrap();
    assert_eq!(regraded.attempt.grade, Some(2.5));
    assert_eq!(h.evaluator.call_count(), 2);
    assert_eq!(h.gradebook.records().await.len(), synced + 1);
}

#[tokio::test]
async fn failed_graph_edit_is_not_saved() {
    let h = harness(ScriptedEvaluator::new());
    let graph = h
        .engine
        .create_quiz(chain("chain", &[("q0", 1.0), ("q1", 1.0)]))
        .await
        .unwrap();

    let err = h
        .engine
        .edit_graph("chain", |g| {
            g.add_question("q2", 1.0)?;
            g.add_question("q0", 1.0)?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::DuplicateQuestion { .. }));

    let stored = h.engine.load_graph("chain").await.unwrap();
    assert_eq!(stored, graph);
    assert!(matches!(
        h.engine.create_quiz(chain("chain", &[])).await,
        Err(QuizError::QuizAlreadyExists(_))
    ));
}

#[tokio::test]
async fn empty_quiz_cannot_be_attempted() {
    let h = harness(ScriptedEvaluator::new());
    h.engine.create_quiz(chain("empty", &[])).await.unwrap();
    assert!(matches!(
        h.engine.start_attempt("empty", "alice", false, now()).await,
        Err(QuizError::EmptyQuiz(_))
    ));
    h.engine.delete_quiz("empty").await.unwrap();
    assert!(matches!(
        h.engine.load_graph("empty").await,
        Err(QuizError::QuizNotFound(_))
    ));
}
