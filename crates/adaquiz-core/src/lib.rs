//! adaquiz-core: Adaptive quiz navigation engine.
//!
//! Quizzes are graphs of question nodes. Each node owns an ordered jump rule
//! set that picks the next node from the learner's grade. This crate defines
//! the graph, the attempt trace built while a learner moves through it, the
//! grade aggregation rules, and the traits for the engine's collaborators.

pub mod access;
pub mod engine;
pub mod error;
pub mod grading;
pub mod graph;
pub mod jump;
pub mod model;
pub mod parser;
pub mod report;
pub mod trace;
pub mod traits;

pub use error::{QuizError, StoreError};
