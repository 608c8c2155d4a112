//! The `adaquiz validate` command.

use std::path::PathBuf;

use anyhow::Result;

use adaquiz_adapters::load_config_from;
use adaquiz_core::graph::Severity;

pub fn execute(quiz_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let quizzes = super::load_quizzes(&quiz_path, &config)?;

    if quizzes.is_empty() {
        anyhow::bail!("no quiz files found under {}", quiz_path.display());
    }

    let mut total_errors = 0;
    let mut total_warnings = 0;

    for graph in &quizzes {
        println!(
            "Quiz: {} [{}] ({} questions)",
            graph.settings.name,
            graph.quiz_id,
            graph.len()
        );

        for issue in graph.validate() {
            let prefix = issue
                .node_id
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} {}: {}", issue.severity, issue.message);
            match issue.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
        }
    }

    if total_errors > 0 {
        anyhow::bail!("{total_errors} error(s) and {total_warnings} warning(s) found");
    }
    if total_warnings == 0 {
        println!("All quizzes valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
