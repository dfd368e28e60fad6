//! Learning loop and store degradation.

use async_trait::async_trait;
use name_matching_core::error::StoreError;
use name_matching_core::models::{MappingStats, UpsertOutcome};
use name_matching_core::{
    CanonicalId, CanonicalIdentity, CanonicalRegistry, InMemoryMappingStore, MappingKey,
    MappingRecord, MappingStore, MatchResult, MatchStrategy, MatchWarning, MatchingConfig,
    MatchingError, MatchingService, SourceObservation, UnmatchedReason, VERIFIED_CONFIDENCE,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FIRST: [&str; 10] = ["Ka", "Lo", "Mi", "Ne", "Ru", "So", "Ta", "Vi", "We", "Zo"];
const SECOND: [&str; 10] = ["bar", "del", "fin", "gor", "hal", "jen", "kir", "mor", "pel", "ter"];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn surname(i: usize) -> String {
    format!("{}{}", FIRST[i / 10], SECOND[i % 10])
}

/// Two players per surname, so a bare surname is always ambiguous.
fn squad_registry() -> CanonicalRegistry {
    let mut identities = Vec::new();
    for i in 0..95 {
        let id = (i as CanonicalId) * 2;
        identities.push(CanonicalIdentity::new(id, format!("Anna {}", surname(i)), "ARS", "M"));
        identities.push(CanonicalIdentity::new(id + 1, format!("Ben {}", surname(i)), "CHE", "D"));
    }
    CanonicalRegistry::from_identities(identities)
}

/// 190 names the cascade cannot auto-accept.
fn unmatched_names() -> Vec<SourceObservation> {
    let mut observations = Vec::new();
    for i in 0..95 {
        observations.push(SourceObservation::new(surname(i), "ffs"));
        observations.push(SourceObservation::new(format!("{} Jr", surname(i)), "ffs"));
    }
    observations
}

#[tokio::test]
async fn test_confirmations_carry_over_to_next_session() {
    init_tracing();
    let store = Arc::new(InMemoryMappingStore::new());
    let observations = unmatched_names();
    assert_eq!(observations.len(), 190);

    // First session: nothing resolves automatically
    let first_session = MatchingService::new(
        squad_registry(),
        Some(store.clone() as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );
    let before = first_session.match_batch(observations.clone()).await;
    assert_eq!(before.len(), 190);
    assert_eq!(before.matched, 0);
    assert_eq!(before.match_rate(), 0.0);

    // A reviewer confirms every fifth name
    let mut confirmed = Vec::new();
    for (idx, observation) in observations.iter().enumerate().step_by(5) {
        let canonical_id = (idx / 2) as CanonicalId * 2;
        first_session
            .confirm(&observation.source_name, "ffs", canonical_id, "reviewer")
            .await
            .unwrap();
        confirmed.push((idx, canonical_id));
    }
    assert_eq!(confirmed.len(), 38);

    // Second session over the same store
    let second_session = MatchingService::new(
        squad_registry(),
        Some(store.clone() as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );
    let after = second_session.match_batch(observations.clone()).await;
    assert_eq!(after.len(), 190);
    assert_eq!(after.matched, 38);
    assert_eq!(after.from_store, 38);
    assert!((after.match_rate() - 0.2).abs() < 1e-9);

    for (idx, canonical_id) in &confirmed {
        let outcome = &after.outcomes[*idx];
        assert!(outcome.from_store);
        assert_eq!(
            outcome.result,
            MatchResult::Matched {
                canonical_id: *canonical_id,
                confidence: VERIFIED_CONFIDENCE,
                strategy: MatchStrategy::Manual,
            }
        );
    }

    for (idx, (old, new)) in before.outcomes.iter().zip(&after.outcomes).enumerate() {
        if confirmed.iter().any(|(c, _)| *c == idx) {
            continue;
        }
        assert!(!new.from_store);
        assert_eq!(old.result, new.result, "outcome {} changed", idx);
    }

    let stats = second_session.stats().await.unwrap();
    assert_eq!(stats.total_mappings, 38);
    assert_eq!(stats.verified_count, 38);
}

#[tokio::test]
async fn test_auto_accepts_are_served_from_store_next_time() {
    let store = Arc::new(InMemoryMappingStore::new());
    let service = MatchingService::new(
        squad_registry(),
        Some(store.clone() as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );
    let observations: Vec<_> = (0..20)
        .map(|i| SourceObservation::new(format!("anna {}", surname(i)), "understat"))
        .collect();

    let first = service.match_batch(observations.clone()).await;
    assert_eq!(first.matched, 20);
    assert_eq!(first.from_store, 0);
    assert_eq!(store.len(), 20);

    let second = service.match_batch(observations).await;
    assert_eq!(second.matched, 20);
    assert_eq!(second.from_store, 20);
    for (a, b) in first.outcomes.iter().zip(&second.outcomes) {
        assert_eq!(a.result, b.result);
    }
}

/// Store whose every call fails as if the database were down.
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl MappingStore for FailingStore {
    async fn lookup(&self, _key: &MappingKey) -> Result<Option<MappingRecord>, StoreError> {
        self.fail()
    }

    async fn upsert(
        &self,
        _key: &MappingKey,
        _canonical_id: CanonicalId,
        _confidence: f64,
        _strategy: MatchStrategy,
    ) -> Result<UpsertOutcome, StoreError> {
        self.fail()
    }

    async fn confirm(
        &self,
        _key: &MappingKey,
        _canonical_id: CanonicalId,
        _actor: &str,
    ) -> Result<MappingRecord, StoreError> {
        self.fail()
    }

    async fn stats(&self) -> Result<MappingStats, StoreError> {
        self.fail()
    }

    async fn list_unverified(
        &self,
        _source_system: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<MappingRecord>, StoreError> {
        self.fail()
    }

    fn backend_name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_store_outage_degrades_to_cascade_only() {
    init_tracing();
    let store = Arc::new(FailingStore::default());
    let config = MatchingConfig {
        batch_concurrency: 1,
        store_failure_threshold: 3,
        store_cooldown: Duration::from_secs(60),
        ..Default::default()
    };
    let service = MatchingService::new(
        squad_registry(),
        Some(store.clone() as Arc<dyn MappingStore>),
        config,
    );

    let observations: Vec<_> = (0..10)
        .map(|i| SourceObservation::new(format!("Ben {}", surname(i)), "ffs"))
        .collect();
    let report = service.match_batch(observations).await;

    assert_eq!(report.len(), 10);
    assert_eq!(report.matched, 10);
    assert!(report.store_degraded);
    assert!(report.outcomes.iter().all(|o| o.store_degraded()));
    // Three failed lookups open the guard; nothing else reaches the store
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);

    let err = service.confirm("Kabar", "ffs", 0, "reviewer").await.unwrap_err();
    assert!(matches!(err, MatchingError::StoreUnavailable(_)));
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_confirm_surfaces_store_failure() {
    let service = MatchingService::new(
        squad_registry(),
        Some(Arc::new(FailingStore::default()) as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );
    let err = service.confirm("Kabar", "ffs", 0, "reviewer").await.unwrap_err();
    assert!(matches!(
        err,
        MatchingError::Store(StoreError::Unavailable(_))
    ));
    assert!(service.stats().await.is_err());
}

#[tokio::test]
async fn test_degraded_outcome_carries_warning() {
    let service = MatchingService::new(
        squad_registry(),
        Some(Arc::new(FailingStore::default()) as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );
    let outcome = service.match_name("Anna Kabar", "ffs", None, None).await;
    assert_eq!(outcome.result.canonical_id(), Some(0));
    assert!(matches!(
        outcome.warnings.as_slice(),
        [MatchWarning::StoreUnavailable { .. }]
    ));
}

/// In-memory store with a fixed delay on every lookup.
struct SlowStore {
    inner: InMemoryMappingStore,
    delay: Duration,
}

#[async_trait]
impl MappingStore for SlowStore {
    async fn lookup(&self, key: &MappingKey) -> Result<Option<MappingRecord>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.lookup(key).await
    }

    async fn upsert(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
    ) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert(key, canonical_id, confidence, strategy).await
    }

    async fn confirm(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        actor: &str,
    ) -> Result<MappingRecord, StoreError> {
        self.inner.confirm(key, canonical_id, actor).await
    }

    async fn stats(&self) -> Result<MappingStats, StoreError> {
        self.inner.stats().await
    }

    async fn list_unverified(
        &self,
        source_system: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MappingRecord>, StoreError> {
        self.inner.list_unverified(source_system, limit).await
    }

    fn backend_name(&self) -> &str {
        "slow"
    }
}

#[tokio::test]
async fn test_batch_timeout_returns_partial_results() {
    let store = SlowStore {
        inner: InMemoryMappingStore::new(),
        delay: Duration::from_millis(50),
    };
    let config = MatchingConfig {
        batch_concurrency: 1,
        ..Default::default()
    }
    .with_batch_timeout(Duration::from_millis(300));
    let service = MatchingService::new(
        squad_registry(),
        Some(Arc::new(store) as Arc<dyn MappingStore>),
        config,
    );

    let observations: Vec<_> = (0..40)
        .map(|i| SourceObservation::new(format!("Anna {}", surname(i)), "ffs"))
        .collect();
    let report = service.match_batch(observations).await;

    assert_eq!(report.len(), 40);
    assert!(report.timed_out > 0);
    assert!(report.matched > 0);
    assert!(report.outcomes[0].result.is_matched());
    assert_eq!(
        report.outcomes[39].result,
        MatchResult::unmatched(UnmatchedReason::TimedOut)
    );
    assert_eq!(report.matched + report.timed_out, 40);
}

#[tokio::test]
async fn test_concurrent_batch_preserves_input_order() {
    let store = SlowStore {
        inner: InMemoryMappingStore::new(),
        delay: Duration::from_millis(5),
    };
    let config = MatchingConfig {
        batch_concurrency: 16,
        ..Default::default()
    };
    let service = MatchingService::new(
        squad_registry(),
        Some(Arc::new(store) as Arc<dyn MappingStore>),
        config,
    );

    let observations = unmatched_names();
    let report = service.match_batch(observations.clone()).await;
    assert_eq!(report.len(), observations.len());
    for (outcome, observation) in report.outcomes.iter().zip(&observations) {
        assert_eq!(outcome.source_name, observation.source_name);
    }
}
