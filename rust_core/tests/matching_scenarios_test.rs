//! End-to-end matching scenarios against the in-memory mapping store.

use name_matching_core::{
    CanonicalIdentity, CanonicalRegistry, InMemoryMappingStore, MappingStore, MatchResult,
    MatchStrategy, MatchingConfig, MatchingService, ReviewReason, SourceObservation,
    UnmatchedReason, VERIFIED_CONFIDENCE,
};
use std::sync::Arc;

fn registry() -> CanonicalRegistry {
    CanonicalRegistry::from_identities(vec![
        CanonicalIdentity::new(42, "Matt ORiley", "BHA", "M"),
        CanonicalIdentity::new(7, "Bukayo Saka", "ARS", "M"),
        CanonicalIdentity::new(11, "José Sá", "WOL", "GK"),
        CanonicalIdentity::new(21, "John Smith", "ARS", "D"),
        CanonicalIdentity::new(22, "Adam Smith", "CHE", "M"),
        CanonicalIdentity::new(30, "Trent Alexander-Arnold", "LIV", "D"),
        CanonicalIdentity::new(31, "Mohamed Salah", "LIV", "F"),
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
async fn test_surname_with_team_and_position_hints_matches() {
    let (service, _) = service();
    let outcome = service
        .match_name("O'Riley", "ffs", Some("BHA"), Some("M"))
        .await;
    assert_eq!(outcome.result.canonical_id(), Some(42));
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn test_html_encoded_name_matches_same_identity() {
    let (service, _) = service();
    let outcome = service.match_name("matt o&#039;riley", "understat", None, None).await;
    match outcome.result {
        MatchResult::Matched {
            canonical_id,
            strategy,
            ..
        } => {
            assert_eq!(canonical_id, 42);
            assert_eq!(strategy, MatchStrategy::Normalized);
        }
        other => panic!("expected match, got {:?}", other),
    }
}

#[tokio::test]
async fn test_named_entity_encoded_name_matches() {
    let registry = CanonicalRegistry::from_identities(vec![
        CanonicalIdentity::new(1, "Benjamin Šeško", "MUN", "F"),
        CanonicalIdentity::new(2, "Nicolò Zaniolo", "AVL", "M"),
        CanonicalIdentity::new(3, "João Pedro", "BHA", "F"),
    ]);
    let store = Arc::new(InMemoryMappingStore::new());
    let service = MatchingService::new(
        registry,
        Some(store.clone() as Arc<dyn MappingStore>),
        MatchingConfig::default(),
    );

    for (raw, expected) in [
        ("Benjamin &Scaron;e&scaron;ko", 1),
        ("Nicol&ograve; Zaniolo", 2),
        ("Jo&atilde;o Pedro", 3),
    ] {
        match service.match_name(raw, "understat", None, None).await.result {
            MatchResult::Matched {
                canonical_id,
                strategy,
                ..
            } => {
                assert_eq!(canonical_id, expected, "{}", raw);
                assert_eq!(strategy, MatchStrategy::Normalized, "{}", raw);
            }
            other => panic!("expected match for {}, got {:?}", raw, other),
        }
    }
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_shared_surname_without_hints_needs_review() {
    let (service, _) = service();
    let outcome = service.match_name("Smith", "ffs", None, None).await;
    match outcome.result {
        MatchResult::NeedsReview {
            reason,
            suggestions,
        } => {
            assert_eq!(reason, ReviewReason::Ambiguous);
            let ids: Vec<_> = suggestions.iter().map(|s| s.identity.id).collect();
            assert!(ids.contains(&21));
            assert!(ids.contains(&22));
        }
        other => panic!("expected review, got {:?}", other),
    }
}

#[tokio::test]
async fn test_team_hint_breaks_surname_tie() {
    let (service, _) = service();
    let outcome = service.match_name("Smith", "ffs", Some("CHE"), Some("MID")).await;
    // contains 80 + team 10 + position 5
    assert_eq!(outcome.result.canonical_id(), Some(22));
}

#[tokio::test]
async fn test_diacritics_and_hyphens() {
    let (service, _) = service();
    let outcome = service.match_name("Jose Sa", "fbref", None, None).await;
    assert_eq!(outcome.result.canonical_id(), Some(11));

    let outcome = service
        .match_name("Trent Alexander Arnold", "fbref", None, None)
        .await;
    assert_eq!(outcome.result.canonical_id(), Some(30));
}

#[tokio::test]
async fn test_low_confidence_offers_suggestions() {
    let (service, store) = service();
    let outcome = service.match_name("M. Salah", "ffs", None, None).await;
    match &outcome.result {
        MatchResult::NeedsReview {
            reason,
            suggestions,
        } => {
            assert_eq!(*reason, ReviewReason::LowConfidence);
            assert_eq!(suggestions[0].identity.id, 31);
            assert_eq!(suggestions[0].strategy, MatchStrategy::TokenOverlap);
        }
        other => panic!("expected review, got {:?}", other),
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_nothing_similar_is_unmatched() {
    let (service, _) = service();
    let outcome = service.match_name("Qxzv", "ffs", None, None).await;
    assert_eq!(
        outcome.result,
        MatchResult::unmatched(UnmatchedReason::NoCandidates)
    );
}

#[tokio::test]
async fn test_repeated_match_is_idempotent() {
    let (service, _) = service();
    for name in ["O'Riley", "Smith", "M. Salah", "Qxzv", ""] {
        let first = service.match_name(name, "ffs", Some("BHA"), None).await;
        let second = service.match_name(name, "ffs", Some("BHA"), None).await;
        assert_eq!(first.result, second.result, "differs for {:?}", name);
    }
}

#[tokio::test]
async fn test_confirmation_pins_result() {
    let (service, _) = service();
    service.confirm("Smith", "ffs", 21, "reviewer").await.unwrap();

    for hint in [None, Some("CHE"), Some("ARS")] {
        let outcome = service.match_name("Smith", "ffs", hint, None).await;
        assert_eq!(
            outcome.result,
            MatchResult::Matched {
                canonical_id: 21,
                confidence: VERIFIED_CONFIDENCE,
                strategy: MatchStrategy::Manual,
            }
        );
    }

    // Other source systems are unaffected
    let outcome = service.match_name("Smith", "understat", None, None).await;
    assert!(outcome.result.needs_review());
}

#[tokio::test]
async fn test_reconfirmation_replaces_verified_mapping() {
    let (service, _) = service();
    service.confirm("Smith", "ffs", 21, "reviewer").await.unwrap();
    service.confirm("Smith", "ffs", 22, "lead").await.unwrap();
    let outcome = service.match_name("Smith", "ffs", None, None).await;
    assert_eq!(outcome.result.canonical_id(), Some(22));
}

#[tokio::test]
async fn test_stats_and_review_queue() {
    let (service, _) = service();
    service.match_name("Bukayo Saka", "ffs", None, None).await;
    service.match_name("O'Riley", "ffs", Some("BHA"), Some("M")).await;
    service.confirm("Smith", "ffs", 21, "reviewer").await.unwrap();
    service.match_name("matt o&#039;riley", "understat", None, None).await;

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.total_mappings, 4);
    assert_eq!(stats.verified_count, 1);
    assert_eq!(stats.by_source["ffs"].total, 3);
    assert_eq!(stats.by_source["understat"].total, 1);

    let queue = service.review_queue(Some("ffs"), 10).await.unwrap();
    assert_eq!(queue.len(), 2);
    assert!(queue[0].confidence <= queue[1].confidence);
    assert!(queue.iter().all(|r| !r.verified));
}

#[tokio::test]
async fn test_batch_yields_one_outcome_per_input() {
    let (service, _) = service();
    let names = [
        "O'Riley", "", "Smith", "Bukayo Saka", "Qxzv", "M. Salah", "  ", "Jose Sa",
    ];
    let observations: Vec<_> = names
        .iter()
        .map(|n| SourceObservation::new(*n, "ffs"))
        .collect();
    let report = service.match_batch(observations).await;

    assert_eq!(report.len(), names.len());
    for (outcome, name) in report.outcomes.iter().zip(names.iter()) {
        assert_eq!(outcome.source_name, *name);
    }
    assert_eq!(
        report.matched + report.needs_review + report.unmatched,
        names.len()
    );
    assert_eq!(report.timed_out, 0);
}
