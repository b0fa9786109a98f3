//! Lumen Retrieve: query encoding, top-k lookup, and context assembly.

pub mod engine;
pub mod types;

pub use engine::RetrievalEngine;
pub use types::*;
