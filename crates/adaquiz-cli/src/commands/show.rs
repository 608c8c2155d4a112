//! The `adaquiz show` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use adaquiz_adapters::load_config_from;
use adaquiz_core::graph::QuizGraph;
use adaquiz_core::parser::{self, END_OF_QUIZ};

pub fn execute(quiz_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let graph = parser::parse_quiz(&quiz_path, &config.quiz_defaults())?;

    let settings = &graph.settings;
    println!("Quiz: {} [{}]", settings.name, graph.quiz_id);
    println!(
        "  max grade {}, grade method {}, navigation {}",
        settings.max_grade, settings.grade_method, settings.navigation
    );
    if let Some(limit) = settings.access.time_limit_secs {
        println!("  time limit {limit}s");
    }
    if let Some(max) = settings.access.max_attempts {
        println!("  at most {max} attempt(s)");
    }

    println!("\n{}", node_table(&graph));
    Ok(())
}

fn node_table(graph: &QuizGraph) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Pos", "Node", "Question", "Weight", "Choice", "Case", "Condition", "Next",
    ]);

    for node in graph.nodes() {
        for (index, case) in node.jumps.cases().iter().enumerate() {
            let next = case
                .target()
                .and_then(|id| graph.find(id))
                .map(|n| n.question_id.clone())
                .unwrap_or_else(|| END_OF_QUIZ.to_string());
            let node_cells = if index == 0 {
                vec![
                    Cell::new(node.position),
                    Cell::new(node.id),
                    Cell::new(&node.question_id),
                    Cell::new(node.grade_weight),
                    Cell::new(if node.options.let_student_choose_jump { "learner" } else { "auto" }),
                ]
            } else {
                (0..5).map(|_| Cell::new("")).collect()
            };
            let mut row = node_cells;
            row.extend([
                Cell::new(&case.name),
                Cell::new(&case.condition),
                Cell::new(next),
            ]);
            table.add_row(row);
        }
    }
    table
}
