//! Subcommand implementations.

pub mod init;
pub mod show;
pub mod simulate;
pub mod validate;

use std::path::Path;

use anyhow::Result;

use adaquiz_adapters::AdaquizConfig;
use adaquiz_core::graph::QuizGraph;
use adaquiz_core::parser;

/// Load one quiz file, or every quiz file under a directory.
pub(crate) fn load_quizzes(path: &Path, config: &AdaquizConfig) -> Result<Vec<QuizGraph>> {
    let defaults = config.quiz_defaults();
    if path.is_dir() {
        parser::load_quiz_directory(path, &defaults)
    } else {
        Ok(vec![parser::parse_quiz(path, &defaults)?])
    }
}

pub(crate) fn format_grade(grade: Option<f64>) -> String {
    grade.map_or_else(|| "-".to_string(), |g| format!("{g:.2}"))
}
