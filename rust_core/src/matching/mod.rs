//! Name matching.
//!
//! - `normalize`: raw name to comparable form
//! - `strategy`: ordered strategy cascade with context boosting
//! - `suggest`: ranked candidates for human review

pub mod normalize;
pub mod strategy;
pub mod suggest;

pub use normalize::{decode_html_entities, normalize, tokenize};
pub use strategy::{
    apply_boost, rank_order, CascadeOutcome, PreparedQuery, ScoredCandidate, StrategyCascade,
};
pub use suggest::SuggestionEngine;
