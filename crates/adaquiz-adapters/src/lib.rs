//! adaquiz-adapters: Implementations of the engine's collaborator traits.
//!
//! Provides an in-memory quiz store with JSON snapshot persistence, scripted
//! evaluator and gradebook implementations, and the configuration loader
//! that wires them together.

pub mod config;
pub mod memory;
pub mod mock;
pub mod snapshot;

pub use config::{
    build_access_policy, create_store, load_config, load_config_from, AdaquizConfig, StoreConfig,
};
pub use memory::MemoryStore;
pub use mock::{RecordingGradebook, ScriptedEvaluator};
