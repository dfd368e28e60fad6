//! Matching service.
//!
//! Public entry point composing the registry, the mapping store, the
//! strategy cascade and the suggestion engine:
//!
//! 1. parse hints (invalid ones become warnings)
//! 2. mapping store lookup by raw key; a hit skips the cascade
//! 3. cascade; an unambiguous auto-acceptable match is written back to the
//!    store and returned as `Matched`
//! 4. otherwise suggestions, `NeedsReview`; nothing above the floor gives
//!    `Unmatched`
//!
//! A failing store never fails a match: the service falls back to the
//! cascade, stops learning for that call and flags the outcome.

use crate::config::MatchingConfig;
use crate::error::{MatchingError, StoreError};
use crate::matching::{CascadeOutcome, PreparedQuery, ScoredCandidate, StrategyCascade, SuggestionEngine};
use crate::models::{
    BatchReport, CanonicalId, HintField, MappingKey, MappingRecord, MappingStats, MatchOutcome,
    MatchResult, MatchWarning, Position, ReviewReason, SourceObservation, TeamCode,
    UnmatchedReason, UpsertOutcome,
};
use crate::registry::CanonicalRegistry;
use crate::store::{MappingStore, StoreGuard};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One matching session: a fixed registry plus an optional mapping store.
#[derive(Clone)]
pub struct MatchingService {
    registry: Arc<CanonicalRegistry>,
    store: Option<Arc<dyn MappingStore>>,
    cascade: StrategyCascade,
    suggestions: SuggestionEngine,
    guard: Arc<StoreGuard>,
    config: MatchingConfig,
}

impl MatchingService {
    pub fn new(
        registry: CanonicalRegistry,
        store: Option<Arc<dyn MappingStore>>,
        config: MatchingConfig,
    ) -> Self {
        let guard = StoreGuard::new(config.store_failure_threshold, config.store_cooldown);
        info!(
            "Matching service ready: {} identities, store={}, auto_accept={}",
            registry.len(),
            store.as_ref().map_or("none", |s| s.backend_name()),
            config.auto_accept_threshold
        );
        Self {
            registry: Arc::new(registry),
            store,
            cascade: StrategyCascade::new(config.clone()),
            suggestions: SuggestionEngine::new(config.clone()),
            guard: Arc::new(guard),
            config,
        }
    }

    /// Session without persistence: nothing is looked up or learned.
    pub fn cascade_only(registry: CanonicalRegistry, config: MatchingConfig) -> Self {
        Self::new(registry, None, config)
    }

    pub fn registry(&self) -> &CanonicalRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Match a single name.
    pub async fn match_name(
        &self,
        source_name: &str,
        source_system: &str,
        team_hint: Option<&str>,
        position_hint: Option<&str>,
    ) -> MatchOutcome {
        let observation = SourceObservation {
            source_name: source_name.to_string(),
            source_system: source_system.to_string(),
            team_hint: team_hint.map(str::to_string),
            position_hint: position_hint.map(str::to_string),
        };
        self.match_observation(&observation).await
    }

    /// Match one observation. Never fails; problems surface as warnings.
    pub async fn match_observation(&self, observation: &SourceObservation) -> MatchOutcome {
        let mut warnings = Vec::new();
        let (team, position) = parse_hints(observation, &mut warnings);
        let key = observation.key();

        if key.is_empty() {
            return finish(
                observation,
                MatchResult::unmatched(UnmatchedReason::EmptyInput),
                false,
                warnings,
            );
        }

        // Store fast path
        let mut learning_store = None;
        if let Some(store) = self.available_store(&mut warnings) {
            match store.lookup(&key).await {
                Ok(Some(record)) => {
                    self.guard.record_success();
                    if let Some(result) = self.from_record(&record, team.as_ref(), &mut warnings) {
                        debug!(
                            "Store hit {}/{} -> {}",
                            key.source_system, key.source_name, record.canonical_id
                        );
                        return finish(observation, result, true, warnings);
                    }
                    learning_store = Some(store);
                }
                Ok(None) => {
                    self.guard.record_success();
                    learning_store = Some(store);
                }
                Err(e) => {
                    self.note_store_error(&e);
                    warn!(
                        "Mapping store lookup failed for {}/{}: {}. Matching without store",
                        key.source_system, key.source_name, e
                    );
                    warnings.push(MatchWarning::StoreUnavailable {
                        detail: e.to_string(),
                    });
                }
            }
        }

        let query = PreparedQuery::new(&observation.source_name, team, position);
        if query.is_empty() {
            return finish(
                observation,
                MatchResult::unmatched(UnmatchedReason::EmptyInput),
                false,
                warnings,
            );
        }

        let result = match self.cascade.run(&query, &self.registry) {
            CascadeOutcome::BestMatch(best) if self.cascade.is_auto_acceptable(&best) => {
                if let Some(store) = learning_store {
                    self.learn(store.as_ref(), &key, &best, &mut warnings).await;
                }
                MatchResult::Matched {
                    canonical_id: best.canonical_id,
                    confidence: best.confidence,
                    strategy: best.strategy,
                }
            }
            CascadeOutcome::BestMatch(_) | CascadeOutcome::NoMatch => {
                self.review(&query, ReviewReason::LowConfidence, &[])
            }
            CascadeOutcome::Ambiguous(tied) => {
                debug!(
                    "Ambiguous match for '{}': {} identities tied",
                    query.raw,
                    tied.len()
                );
                self.review(&query, ReviewReason::Ambiguous, &tied)
            }
        };

        finish(observation, result, false, warnings)
    }

    /// Match many observations concurrently.
    ///
    /// Always returns exactly one outcome per input, in input order. When
    /// the configured batch timeout expires, observations still pending
    /// are reported as `Unmatched` with reason `TimedOut`.
    pub async fn match_batch(&self, observations: Vec<SourceObservation>) -> BatchReport {
        let started = Instant::now();
        let mut slots: Vec<Option<MatchOutcome>> = vec![None; observations.len()];

        {
            let mut pending = stream::iter(observations.iter().enumerate())
                .map(|(idx, observation)| async move {
                    (idx, self.match_observation(observation).await)
                })
                .buffer_unordered(self.config.batch_concurrency.max(1));

            let collect = async {
                while let Some((idx, outcome)) = pending.next().await {
                    slots[idx] = Some(outcome);
                    // Cascade work never suspends; yield so the deadline is observed
                    tokio::task::yield_now().await;
                }
            };

            match self.config.batch_timeout {
                Some(timeout) => {
                    if tokio::time::timeout_at(started + timeout, collect).await.is_err() {
                        warn!(
                            "Batch timed out after {:?}; pending observations marked unmatched",
                            timeout
                        );
                    }
                }
                None => collect.await,
            }
        }

        let outcomes: Vec<MatchOutcome> = observations
            .iter()
            .zip(slots)
            .map(|(observation, slot)| {
                slot.unwrap_or_else(|| {
                    MatchOutcome::new(observation, MatchResult::unmatched(UnmatchedReason::TimedOut))
                })
            })
            .collect();

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            "Batch of {} matched in {:?}: matched={} needs_review={} unmatched={} (timed_out={}) from_store={}{}",
            report.len(),
            started.elapsed(),
            report.matched,
            report.needs_review,
            report.unmatched,
            report.timed_out,
            report.from_store,
            if report.store_degraded { " [store degraded]" } else { "" }
        );
        report
    }

    /// Record a human decision. Later matches of this key return the
    /// confirmed identity at the verified confidence.
    pub async fn confirm(
        &self,
        source_name: &str,
        source_system: &str,
        canonical_id: CanonicalId,
        actor: &str,
    ) -> Result<MappingRecord, MatchingError> {
        let key = MappingKey::new(source_system, source_name);
        if key.is_empty() {
            return Err(MatchingError::EmptySourceName);
        }
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(MatchingError::EmptyActor);
        }
        if !self.registry.contains(canonical_id) {
            warn!(
                "Rejected confirmation of {}/{} -> {}: id not in registry",
                key.source_system, key.source_name, canonical_id
            );
            return Err(MatchingError::DataConflict { canonical_id });
        }

        let store = self.required_store()?;
        match store.confirm(&key, canonical_id, actor).await {
            Ok(record) => {
                self.guard.record_success();
                info!(
                    "Confirmed {}/{} -> {} by {}",
                    key.source_system, key.source_name, canonical_id, actor
                );
                Ok(record)
            }
            Err(e) => {
                self.note_store_error(&e);
                Err(e.into())
            }
        }
    }

    /// Mapping counts across all sources.
    pub async fn stats(&self) -> Result<MappingStats, MatchingError> {
        let store = self.required_store()?;
        store.stats().await.map_err(|e| {
            self.note_store_error(&e);
            e.into()
        })
    }

    /// Unverified (auto-accepted) mappings, least confident first.
    pub async fn review_queue(
        &self,
        source_system: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MappingRecord>, MatchingError> {
        let store = self.required_store()?;
        store
            .list_unverified(source_system, limit)
            .await
            .map_err(|e| {
                self.note_store_error(&e);
                e.into()
            })
    }

    fn available_store(&self, warnings: &mut Vec<MatchWarning>) -> Option<Arc<dyn MappingStore>> {
        let store = self.store.as_ref()?;
        if !self.guard.allow() {
            warnings.push(MatchWarning::StoreUnavailable {
                detail: "mapping store bypassed after repeated failures".to_string(),
            });
            return None;
        }
        Some(Arc::clone(store))
    }

    fn required_store(&self) -> Result<Arc<dyn MappingStore>, MatchingError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| MatchingError::StoreUnavailable("no mapping store attached".into()))?;
        if !self.guard.allow() {
            return Err(MatchingError::StoreUnavailable(
                "mapping store bypassed after repeated failures".into(),
            ));
        }
        Ok(Arc::clone(store))
    }

    fn note_store_error(&self, error: &StoreError) {
        if error.is_transient() {
            self.guard.record_failure();
        }
    }

    /// Turn a stored mapping into a result, or `None` if it points at an
    /// identity the registry no longer has.
    fn from_record(
        &self,
        record: &MappingRecord,
        team_hint: Option<&TeamCode>,
        warnings: &mut Vec<MatchWarning>,
    ) -> Option<MatchResult> {
        let Some(entry) = self.registry.indexed(record.canonical_id) else {
            warn!(
                "Stored mapping {}/{} points at unknown id {}, re-matching",
                record.source_system, record.source_name, record.canonical_id
            );
            warnings.push(MatchWarning::StaleMapping {
                canonical_id: record.canonical_id,
            });
            return None;
        };

        if let (Some(hint), Some(team)) = (team_hint, &entry.team) {
            if hint != team {
                debug!(
                    "Team mismatch for {}/{}: registry {} vs hint {}",
                    record.source_system, record.source_name, team, hint
                );
                warnings.push(MatchWarning::TeamMismatch {
                    canonical_id: record.canonical_id,
                    registry_team: team.to_string(),
                    hinted_team: hint.to_string(),
                });
            }
        }

        Some(MatchResult::Matched {
            canonical_id: record.canonical_id,
            confidence: record.confidence,
            strategy: record.strategy,
        })
    }

    async fn learn(
        &self,
        store: &dyn MappingStore,
        key: &MappingKey,
        best: &ScoredCandidate,
        warnings: &mut Vec<MatchWarning>,
    ) {
        match store
            .upsert(key, best.canonical_id, best.confidence, best.strategy)
            .await
        {
            Ok(UpsertOutcome::SkippedVerified) => {
                debug!(
                    "Kept verified mapping for {}/{}",
                    key.source_system, key.source_name
                );
            }
            Ok(_) => self.guard.record_success(),
            Err(e) => {
                self.note_store_error(&e);
                warn!(
                    "Could not record mapping {}/{} -> {}: {}",
                    key.source_system, key.source_name, best.canonical_id, e
                );
                warnings.push(MatchWarning::StoreUnavailable {
                    detail: e.to_string(),
                });
            }
        }
    }

    fn review(
        &self,
        query: &PreparedQuery,
        reason: ReviewReason,
        tied: &[ScoredCandidate],
    ) -> MatchResult {
        let suggestions = self.suggestions.suggest_with(query, &self.registry, tied);
        if suggestions.is_empty() {
            MatchResult::unmatched(UnmatchedReason::NoCandidates)
        } else {
            MatchResult::NeedsReview {
                reason,
                suggestions,
            }
        }
    }
}

fn finish(
    observation: &SourceObservation,
    result: MatchResult,
    from_store: bool,
    warnings: Vec<MatchWarning>,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::new(observation, result);
    outcome.from_store = from_store;
    outcome.warnings = warnings;
    outcome
}

/// Parse hints; blank hints count as absent, malformed ones as warnings.
fn parse_hints(
    observation: &SourceObservation,
    warnings: &mut Vec<MatchWarning>,
) -> (Option<TeamCode>, Option<Position>) {
    let team = parse_hint(
        observation.team_hint.as_deref(),
        HintField::Team,
        TeamCode::parse,
        warnings,
    );
    let position = parse_hint(
        observation.position_hint.as_deref(),
        HintField::Position,
        Position::parse,
        warnings,
    );
    (team, position)
}

fn parse_hint<T>(
    raw: Option<&str>,
    field: HintField,
    parse: impl Fn(&str) -> Option<T>,
    warnings: &mut Vec<MatchWarning>,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let parsed = parse(raw);
    if parsed.is_none() {
        warn!("Ignoring invalid {:?} hint '{}'", field, raw);
        warnings.push(MatchWarning::InvalidHint {
            field,
            value: raw.to_string(),
        });
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalIdentity, MatchStrategy, VERIFIED_CONFIDENCE};
    use crate::store::InMemoryMappingStore;

    fn registry() -> CanonicalRegistry {
        CanonicalRegistry::from_identities(vec![
            CanonicalIdentity::new(42, "Matt ORiley", "BHA", "M"),
            CanonicalIdentity::new(1, "John Smith", "ARS", "D"),
            CanonicalIdentity::new(2, "Adam Smith", "CHE", "M"),
            CanonicalIdentity::new(7, "Bukayo Saka", "ARS", "M"),
        ])
    }

    fn service() -> (MatchingService, Arc<InMemoryMappingStore>) {
        let store = Arc::new(InMemoryMappingStore::new());
        let service = MatchingService::new(
            registry(),
            Some(store.clone() as Arc<dyn MappingStore>),
            MatchingConfig::default(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_auto_accept_writes_through() {
        let (service, store) = service();
        let outcome = service.match_name("Bukayo Saka", "ffs", None, None).await;
        assert_eq!(outcome.result.canonical_id(), Some(7));
        assert!(!outcome.from_store);

        let record = store.peek(&MappingKey::new("ffs", "Bukayo Saka")).unwrap();
        assert_eq!(record.canonical_id, 7);
        assert_eq!(record.strategy, MatchStrategy::Exact);
        assert!(!record.verified);

        let again = service.match_name("Bukayo Saka", "ffs", None, None).await;
        assert!(again.from_store);
        assert_eq!(again.result, outcome.result);
    }

    #[tokio::test]
    async fn test_empty_name_is_unmatched() {
        let (service, _) = service();
        let outcome = service.match_name("   ", "ffs", None, None).await;
        assert_eq!(
            outcome.result,
            MatchResult::unmatched(UnmatchedReason::EmptyInput)
        );
    }

    #[tokio::test]
    async fn test_invalid_hint_is_warning_only() {
        let (service, _) = service();
        let outcome = service
            .match_name("Bukayo Saka", "ffs", Some("Arsenal FC!"), Some("libero"))
            .await;
        assert!(outcome.result.is_matched());
        assert_eq!(outcome.warnings.len(), 2);
        assert!(matches!(
            outcome.warnings[0],
            MatchWarning::InvalidHint {
                field: HintField::Team,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blank_hint_is_absent() {
        let (service, _) = service();
        let outcome = service.match_name("Bukayo Saka", "ffs", Some("  "), None).await;
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_surname_needs_review() {
        let (service, store) = service();
        let outcome = service.match_name("Smith", "ffs", None, None).await;
        match &outcome.result {
            MatchResult::NeedsReview {
                reason,
                suggestions,
            } => {
                assert_eq!(*reason, ReviewReason::Ambiguous);
                let ids: Vec<_> = suggestions.iter().map(|s| s.identity.id).collect();
                assert!(ids.contains(&1) && ids.contains(&2));
            }
            other => panic!("expected review, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_then_match_is_verified() {
        let (service, _) = service();
        let record = service.confirm("Smith", "ffs", 2, "alice").await.unwrap();
        assert!(record.verified);

        let outcome = service.match_name("Smith", "ffs", None, None).await;
        assert_eq!(
            outcome.result,
            MatchResult::Matched {
                canonical_id: 2,
                confidence: VERIFIED_CONFIDENCE,
                strategy: MatchStrategy::Manual,
            }
        );
        assert!(outcome.from_store);
    }

    #[tokio::test]
    async fn test_confirm_unknown_id_is_data_conflict() {
        let (service, store) = service();
        let err = service.confirm("Smith", "ffs", 999, "alice").await.unwrap_err();
        assert!(matches!(err, MatchingError::DataConflict { canonical_id: 999 }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_validates_input() {
        let (service, _) = service();
        assert!(matches!(
            service.confirm(" ", "ffs", 1, "alice").await,
            Err(MatchingError::EmptySourceName)
        ));
        assert!(matches!(
            service.confirm("Smith", "ffs", 1, "").await,
            Err(MatchingError::EmptyActor)
        ));
    }

    #[tokio::test]
    async fn test_cascade_only_session() {
        let service = MatchingService::cascade_only(registry(), MatchingConfig::default());
        let outcome = service.match_name("Bukayo Saka", "ffs", None, None).await;
        assert!(outcome.result.is_matched());
        assert!(outcome.warnings.is_empty());
        assert!(matches!(
            service.stats().await,
            Err(MatchingError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_mapping_falls_back_to_cascade() {
        let (service, store) = service();
        store.confirm(&MappingKey::new("ffs", "Bukayo Saka"), 555, "old").await.unwrap();
        let outcome = service.match_name("Bukayo Saka", "ffs", None, None).await;
        assert_eq!(outcome.result.canonical_id(), Some(7));
        assert!(!outcome.from_store);
        assert!(outcome
            .warnings
            .contains(&MatchWarning::StaleMapping { canonical_id: 555 }));
    }

    #[tokio::test]
    async fn test_team_change_keeps_mapping_with_warning() {
        let (service, _) = service();
        service.confirm("B. Saka", "ffs", 7, "alice").await.unwrap();
        let outcome = service.match_name("B. Saka", "ffs", Some("CHE"), None).await;
        assert_eq!(outcome.result.canonical_id(), Some(7));
        assert!(outcome.from_store);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [MatchWarning::TeamMismatch { canonical_id: 7, .. }]
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let (service, _) = service();
        let observations = vec![
            SourceObservation::new("Smith", "ffs"),
            SourceObservation::new("", "ffs"),
            SourceObservation::new("Bukayo Saka", "ffs"),
            SourceObservation::new("Qxzv Wyrt", "ffs"),
        ];
        let report = service.match_batch(observations).await;
        assert_eq!(report.len(), 4);
        assert!(report.outcomes[0].result.needs_review());
        assert!(report.outcomes[1].result.is_unmatched());
        assert_eq!(report.outcomes[2].result.canonical_id(), Some(7));
        assert_eq!(report.outcomes[3].source_name, "Qxzv Wyrt");
        assert_eq!(report.matched + report.needs_review + report.unmatched, 4);
    }
}
