//! adaquiz CLI: validate, inspect and simulate adaptive quizzes.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "adaquiz", version, about = "Adaptive quiz navigation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate quiz definition files
    Validate {
        /// Path to a quiz .toml file or a directory of them
        #[arg(long)]
        quiz: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the node graph of a quiz
    Show {
        /// Path to a quiz .toml file
        #[arg(long)]
        quiz: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run scripted attempts through a quiz
    Simulate {
        /// Path to a quiz .toml file
        #[arg(long)]
        quiz: PathBuf,

        /// Comma-separated responses for one attempt, e.g. "0.8,0.3:Try again".
        /// Repeat the flag for several attempts.
        #[arg(long, required = true)]
        responses: Vec<String>,

        /// Learner id the attempts run as
        #[arg(long, default_value = "learner")]
        user: String,

        /// Run the attempts as previews
        #[arg(long)]
        preview: bool,

        /// Directory for JSON attempt reports
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config and example quiz
    Init,
}

#[tokio::main]
async fn main() {
    let directive: tracing_subscriber::filter::Directive = match "adaquiz=info".parse() {
        Ok(directive) => directive,
        Err(e) => {
            eprintln!("Error: invalid log directive: {e}");
            process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { quiz, config } => commands::validate::execute(quiz, config),
        Commands::Show { quiz, config } => commands::show::execute(quiz, config),
        Commands::Simulate {
            quiz,
            responses,
            user,
            preview,
            output,
            config,
        } => commands::simulate::execute(quiz, responses, user, preview, output, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
