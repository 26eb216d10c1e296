//! # Quarry Engine
//!
//! The external surface of the search engine: three search operations, the
//! indexing control plane, and the repository registry operations, wired
//! over the subsystem crates. The out-of-scope HTTP façade and MCP bridge
//! are expected to call into this crate and nothing deeper.

mod engine;

pub use engine::{Engine, EngineOptions, RepositoryOverview};
