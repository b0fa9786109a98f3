//! Lumen runtime: the assistant that routes a query to a device action or a
//! retrieval-augmented answer, and owns every engine component for a session.

pub mod assistant;
pub mod prompt;
pub mod types;

pub use assistant::Assistant;
pub use prompt::build_prompt;
pub use types::{Answer, AnswerStream};
