//! TOML quiz definition parser.
//!
//! Loads quiz graphs from TOML files and directories. Graphs are built
//! through the regular [`QuizGraph`] operations, so a parsed quiz obeys the
//! same defaults and invariants as one assembled by an editor.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::access::AccessWindow;
use crate::grading::GradeMethod;
use crate::graph::{JumpSpec, QuizGraph};
use crate::jump::{Comparator, JumpCondition};
use crate::model::{default_max_grade, NavigationMode, NodeOptions, QuizSettings};

/// Destination keyword for the end of the quiz.
pub const END_OF_QUIZ: &str = "end";

/// Settings used when a quiz file leaves them out.
#[derive(Debug, Clone)]
pub struct QuizDefaults {
    pub max_grade: f64,
    pub grade_method: GradeMethod,
    pub navigation: NavigationMode,
}

impl Default for QuizDefaults {
    fn default() -> Self {
        Self {
            max_grade: default_max_grade(),
            grade_method: GradeMethod::default(),
            navigation: NavigationMode::default(),
        }
    }
}

/// Intermediate TOML structure for quiz files.
#[derive(Debug, Deserialize)]
struct TomlQuizFile {
    quiz: TomlQuizHeader,
    #[serde(default)]
    nodes: Vec<TomlNode>,
}

#[derive(Debug, Deserialize)]
struct TomlQuizHeader {
    id: String,
    name: String,
    #[serde(default)]
    max_grade: Option<f64>,
    #[serde(default)]
    grade_method: Option<String>,
    #[serde(default)]
    navigation: Option<String>,
    #[serde(default)]
    time_open: Option<String>,
    #[serde(default)]
    time_close: Option<String>,
    #[serde(default)]
    time_limit_secs: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TomlNode {
    question: String,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    let_student_choose_jump: bool,
    #[serde(default)]
    common_random_seed: bool,
    #[serde(default)]
    jumps: Vec<TomlJump>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct TomlJump {
    kind: String,
    #[serde(default)]
    comparator: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    /// A question id, `"end"`, or absent for the end of the quiz.
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Parse a single TOML file into a `QuizGraph`.
pub fn parse_quiz(path: &Path, defaults: &QuizDefaults) -> Result<QuizGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read quiz file: {}", path.display()))?;

    parse_quiz_str(&content, path, defaults)
}

/// Parse a TOML string into a `QuizGraph`.
pub fn parse_quiz_str(
    content: &str,
    source_path: &Path,
    defaults: &QuizDefaults,
) -> Result<QuizGraph> {
    let parsed: TomlQuizFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.quiz;

    let settings = QuizSettings {
        name: header.name,
        max_grade: header.max_grade.unwrap_or(defaults.max_grade),
        grade_method: header
            .grade_method
            .map(|m| m.parse().map_err(|e: String| anyhow::anyhow!("{}", e)))
            .transpose()?
            .unwrap_or(defaults.grade_method),
        navigation: header
            .navigation
            .map(|n| n.parse().map_err(|e: String| anyhow::anyhow!("{}", e)))
            .transpose()?
            .unwrap_or(defaults.navigation),
        access: AccessWindow {
            time_open: header.time_open.as_deref().map(parse_time).transpose()?,
            time_close: header.time_close.as_deref().map(parse_time).transpose()?,
            time_limit_secs: header.time_limit_secs,
            max_attempts: header.max_attempts,
        },
    };
    if !settings.max_grade.is_finite() || settings.max_grade < 0.0 {
        anyhow::bail!("max_grade must be a non-negative number, got {}", settings.max_grade);
    }

    let mut graph = QuizGraph::new(header.id, settings);

    // Place every question first so jumps can reference later nodes.
    for node in &parsed.nodes {
        let id = graph
            .add_question(&node.question, node.weight)
            .with_context(|| format!("invalid node '{}'", node.question))?
            .id;
        graph.set_options(
            id,
            NodeOptions {
                let_student_choose_jump: node.let_student_choose_jump,
                common_random_seed: node.common_random_seed,
            },
        )?;
    }

    for node in parsed.nodes.iter().filter(|n| !n.jumps.is_empty()) {
        let specs = node
            .jumps
            .iter()
            .map(|jump| jump_spec(&graph, jump))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid jumps of node '{}'", node.question))?;
        let id = graph
            .node_by_question(&node.question)
            .map(|n| n.id)
            .with_context(|| format!("node '{}' disappeared while parsing", node.question))?;
        graph
            .replace_jumps(id, specs)
            .with_context(|| format!("invalid jumps of node '{}'", node.question))?;
    }

    Ok(graph)
}

fn jump_spec(graph: &QuizGraph, jump: &TomlJump) -> Result<JumpSpec> {
    let condition = match jump.kind.to_lowercase().as_str() {
        "unconditional" | "next" => JumpCondition::Unconditional,
        "finish" | "finish_quiz" => JumpCondition::FinishQuiz,
        "grade_threshold" | "threshold" => {
            let comparator: Comparator = jump
                .comparator
                .as_deref()
                .context("threshold jump needs a comparator")?
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{}", e))?;
            let value = jump.value.context("threshold jump needs a value")?;
            JumpCondition::threshold(comparator, value)
        }
        other => anyhow::bail!("unknown jump kind: {other}"),
    };

    let destination = match jump.to.as_deref() {
        None | Some(END_OF_QUIZ) => None,
        Some(question) => Some(
            graph
                .node_by_question(question)
                .with_context(|| format!("jump target '{question}' is not a question of this quiz"))?
                .id,
        ),
    };

    Ok(JumpSpec {
        condition,
        destination,
        name: jump.name.clone(),
    })
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 timestamp: {value}"))
}

/// Recursively load all `.toml` quiz files from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_quiz_directory(dir: &Path, defaults: &QuizDefaults) -> Result<Vec<QuizGraph>> {
    let mut quizzes = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();

        if path.is_dir() {
            quizzes.extend(load_quiz_directory(&path, defaults)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_quiz(&path, defaults) {
                Ok(graph) => quizzes.push(graph),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(quizzes)
}
