//! The `adaquiz init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    // Create adaquiz.toml
    if std::path::Path::new("adaquiz.toml").exists() {
        println!("adaquiz.toml already exists, skipping.");
    } else {
        std::fs::write("adaquiz.toml", SAMPLE_CONFIG)?;
        println!("Created adaquiz.toml");
    }

    // Create example quiz
    std::fs::create_dir_all("quizzes")?;
    let example_path = std::path::Path::new("quizzes/example.toml");
    if example_path.exists() {
        println!("quizzes/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_QUIZ)?;
        println!("Created quizzes/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: adaquiz validate --quiz quizzes/example.toml");
    println!("  2. Run: adaquiz show --quiz quizzes/example.toml");
    println!("  3. Run: adaquiz simulate --quiz quizzes/example.toml --responses 0.3,1,1");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# adaquiz configuration

default_max_grade = 10.0
default_grade_method = "highest"
default_navigation = "free"
quizzes_dir = "./quizzes"

# Keep quizzes and attempts between runs.
[store]
type = "snapshot"
path = "./adaquiz-data/adaquiz-store.json"

[access.groups]
extra-time = []

[[access.overrides]]
quiz = "example"
group = "extra-time"
time_limit_secs = 3600
"#;

const EXAMPLE_QUIZ: &str = r#"[quiz]
id = "example"
name = "Example Adaptive Quiz"
max_grade = 10.0
grade_method = "highest"
time_limit_secs = 1800

[[nodes]]
question = "warmup"

[[nodes.jumps]]
kind = "grade_threshold"
comparator = "<"
value = 0.5
to = "review"
name = "Needs review"

[[nodes.jumps]]
kind = "unconditional"
to = "challenge"
name = "Continue"

[[nodes]]
question = "review"

[[nodes.jumps]]
kind = "unconditional"
to = "challenge"
name = "Continue"

[[nodes]]
question = "challenge"
weight = 2.0
"#;
