//! The `adaquiz simulate` command.
//!
//! Loads a quiz into the configured store and drives scripted attempts
//! through the adaptive engine, one attempt per `--responses` flag.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use adaquiz_adapters::{
    build_access_policy, create_store, load_config_from, RecordingGradebook, ScriptedEvaluator,
};
use adaquiz_core::engine::{AdaptiveEngine, EngineConfig};
use adaquiz_core::graph::QuizGraph;
use adaquiz_core::parser;
use adaquiz_core::report::AttemptReport;

/// One scripted step: the fraction to answer with and an optional case name.
#[derive(Debug, Clone, PartialEq)]
struct ScriptedStep {
    fraction: f64,
    choice: Option<String>,
}

pub async fn execute(
    quiz_path: PathBuf,
    responses: Vec<String>,
    user: String,
    preview: bool,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let graph = parser::parse_quiz(&quiz_path, &config.quiz_defaults())?;
    let scripts = responses
        .iter()
        .map(|line| parse_script(line))
        .collect::<Result<Vec<_>>>()?;

    let store = create_store(&config.store).await?;
    let policy = build_access_policy(&config.access, std::slice::from_ref(&graph));
    let engine = AdaptiveEngine::new(
        store,
        Arc::new(ScriptedEvaluator::new()),
        Arc::new(RecordingGradebook::new()),
        EngineConfig::default(),
    )
    .with_access_policy(Arc::new(policy));

    let graph = install_quiz(&engine, graph).await?;
    let quiz_id = graph.quiz_id.clone();

    eprintln!(
        "adaquiz v{}: simulating {} attempt(s) of '{}' as {user}",
        env!("CARGO_PKG_VERSION"),
        scripts.len(),
        graph.settings.name
    );

    for (number, script) in scripts.iter().enumerate() {
        let number = number + 1;
        let report = run_attempt(&engine, &graph, &user, preview, script).await?;

        println!("\nAttempt {number} ({})", report.attempt_id);
        println!("{}", trace_table(&report));
        println!(
            "Grade: {} / {}",
            super::format_grade(report.grade),
            report.max_grade
        );

        if let Some(dir) = &output {
            let path = report_path(dir, number, &report);
            report.save_json(&path)?;
            eprintln!("Report saved to: {}", path.display());
        }
    }

    if !preview {
        let grade = engine.quiz_grade(&quiz_id, &user).await?;
        println!(
            "\nQuiz grade ({}): {} / {}",
            graph.settings.grade_method,
            super::format_grade(grade),
            graph.settings.max_grade
        );
    }

    Ok(())
}

/// Store the parsed quiz, replacing an older definition kept by a persistent store.
async fn install_quiz(engine: &AdaptiveEngine, graph: QuizGraph) -> Result<QuizGraph> {
    if engine.load_graph(&graph.quiz_id).await.is_ok() {
        tracing::info!(quiz = %graph.quiz_id, "replacing stored quiz definition");
        let quiz_id = graph.quiz_id.clone();
        return Ok(engine
            .edit_graph(&quiz_id, move |stored| {
                *stored = graph;
                Ok(())
            })
            .await?);
    }
    Ok(engine.create_quiz(graph).await?)
}

async fn run_attempt(
    engine: &AdaptiveEngine,
    graph: &QuizGraph,
    user: &str,
    preview: bool,
    script: &[ScriptedStep],
) -> Result<AttemptReport> {
    let now = chrono::Utc::now();
    let mut trace = engine
        .start_attempt(&graph.quiz_id, user, preview, now)
        .await?;
    let attempt_id = trace.id();

    let mut steps = script.iter();
    while !trace.is_finished() {
        let position = trace.current_position();
        let Some(step) = steps.next() else {
            eprintln!("  responses ran out at position {position}, finishing attempt");
            trace = engine.force_finish(attempt_id, now).await?;
            break;
        };

        engine
            .submit_response(attempt_id, position, serde_json::json!(step.fraction), now)
            .await
            .with_context(|| format!("failed to answer position {position}"))?;
        trace = engine
            .confirm_advance(attempt_id, position, step.choice.as_deref(), now)
            .await
            .with_context(|| format!("failed to leave position {position}"))?;
    }

    let unused = steps.count();
    if unused > 0 {
        eprintln!("  attempt finished with {unused} response(s) left over");
    }

    Ok(AttemptReport::from_trace(&trace, graph))
}

/// Parse `"0.8, 0.3:Try again"` into scripted steps.
fn parse_script(line: &str) -> Result<Vec<ScriptedStep>> {
    line.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let (fraction, choice) = match token.split_once(':') {
                Some((fraction, choice)) => (fraction.trim(), Some(choice.trim().to_string())),
                None => (token, None),
            };
            let fraction = fraction
                .parse::<f64>()
                .with_context(|| format!("invalid response fraction: '{token}'"))?;
            Ok(ScriptedStep { fraction, choice })
        })
        .collect()
}

fn report_path(dir: &Path, number: usize, report: &AttemptReport) -> PathBuf {
    dir.join(format!(
        "{}-attempt-{number}-{}.json",
        report.quiz_id, report.attempt_id
    ))
}

fn trace_table(report: &AttemptReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Pos", "Question", "Weight", "Fraction", "Jump", "Next"]);
    for row in &report.rows {
        table.add_row(vec![
            Cell::new(row.position),
            Cell::new(&row.question_id),
            Cell::new(row.grade_weight),
            Cell::new(super::format_grade(row.fraction)),
            Cell::new(row.jump.as_deref().unwrap_or("-")),
            Cell::new(row.destination.as_deref().unwrap_or("-")),
        ]);
    }
    table
}
