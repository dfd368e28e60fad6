//! Name Matching Core - player name resolution across external data sources.
//!
//! This crate provides:
//! - Name normalization (HTML entities, diacritics, punctuation)
//! - A strategy cascade (exact, normalized, contains, token overlap, fuzzy,
//!   surname) with team/position context boosting and ambiguity detection
//! - Ranked suggestions for human review, scanned on rayon for large registries
//! - A mapping store (in-memory or PostgreSQL) that learns from auto-accepted
//!   matches and human confirmations
//! - A matching service with order-preserving, deadline-aware batch matching

pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod registry;
pub mod service;
pub mod store;

pub use config::MatchingConfig;
pub use error::{MatchingError, StoreError};
pub use matching::{normalize, CascadeOutcome, PreparedQuery, StrategyCascade, SuggestionEngine};
pub use models::{
    BatchReport, CanonicalId, CanonicalIdentity, MappingKey, MappingRecord, MappingStats,
    MatchOutcome, MatchResult, MatchStrategy, MatchWarning, ReviewReason, SourceObservation,
    Suggestion, UnmatchedReason, VERIFIED_CONFIDENCE,
};
pub use registry::CanonicalRegistry;
pub use service::MatchingService;
pub use store::{InMemoryMappingStore, MappingStore, PgMappingStore};
