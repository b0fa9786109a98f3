//! Lumen Actions: routes a query to a deterministic device action or to chat.
//!
//! Matching runs in two stages. An exact stage looks for a catalog phrase
//! inside the query and needs no model. A semantic stage compares the query
//! embedding against each action's description embedding and applies a
//! per-action threshold.

pub mod action;
pub mod catalog;
pub mod matcher;

pub use action::{ActionHandler, AppAction};
pub use catalog::{default_catalog, OPEN_APP_ACTION_ID};
pub use matcher::{ActionMatch, ActionMatcher, EmbeddingState, MatchKind, Thresholds};
