//! Integration Tests: End-to-End Scoring and Learning Flows
//!
//! These tests drive the public API over the in-memory store:
//! learn → collaborative run → score → adapt → rescore → cleanup.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use attune_core::adaptation::{DirectedUserModelAdapter, RescoreQueue};
use attune_core::aggregation::Feature;
use attune_core::chain::{LearnerChain, ScorerChain};
use attune_core::cleanup::cleanup;
use attune_core::collaborative::{
    CollaborativeScoreComputer, CombiningComputer, MergeStrategy, UserMessageComputer,
    UserTermPerGroupComputer, run_computer,
};
use attune_core::config::AttuneConfig;
use attune_core::decay::{DAY_MS, DecayFunction};
use attune_core::integration::StrategyKind;
use attune_core::metrics::PipelineCounters;
use attune_core::similarity::{GroupSimilarityComputer, StoredInterestSelector, TermUserSimilarity};
use attune_core::{
    InMemoryStore, Interest, LearningMessage, Message, MessageGroupId, MessageId, ModelType,
    ScoredTerm, Store, Term, UserId, UserModelEntry,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap_or_default()
}

fn message(id: u64, words: &[(&str, f64)]) -> Message {
    Message::new(
        MessageId(id),
        t0(),
        words
            .iter()
            .map(|(w, s)| ScoredTerm::new(Term::word(w), *s))
            .collect(),
    )
    .in_group(MessageGroupId(1))
}

struct World {
    store: Arc<InMemoryStore>,
    config: AttuneConfig,
    counters: Arc<PipelineCounters>,
    learner: LearnerChain,
    scorer: ScorerChain,
}

/// Three messages in one group, rated by three users:
///
/// | user | m1 | m2 | m3 |
/// |---|---|---|---|
/// | 1 | high | | |
/// | 2 | high | high | extreme |
/// | 3 | high | | high |
fn world() -> World {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let config = AttuneConfig::default();
    let counters = Arc::new(PipelineCounters::new());
    let learner = LearnerChain::new(store.clone(), &config, counters.clone()).unwrap();
    let scorer = ScorerChain::new(store.clone(), &config, counters.clone()).unwrap();

    let messages = [
        message(1, &[("rust", 1.0), ("async", 1.0)]),
        message(2, &[("rust", 1.0), ("tokio", 1.0)]),
        message(3, &[("rust", 1.0), ("wasm", 1.0)]),
    ];
    for m in &messages {
        store.insert_message(m.clone());
    }

    let ratings = [
        (1, 0, Interest::High),
        (2, 0, Interest::High),
        (2, 1, Interest::High),
        (2, 2, Interest::Extreme),
        (3, 0, Interest::High),
        (3, 2, Interest::High),
    ];
    for (user, idx, interest) in ratings {
        learner
            .learn(LearningMessage::rating(messages[idx].clone(), UserId(user), interest, t0()))
            .unwrap();
    }

    World {
        store,
        config,
        counters,
        learner,
        scorer,
    }
}

fn entry(store: &InMemoryStore, user: u64, word: &str) -> Option<UserModelEntry> {
    let model = store
        .get_or_create_user_model(UserId(user), &ModelType::default())
        .unwrap();
    store.get_all_entries(&model).unwrap().remove(&Term::word(word))
}

// ---------------------------------------------------------------------------
// Full flow: learn → collaborate → score → adapt → rescore → learn → cleanup
// ---------------------------------------------------------------------------

#[test]
fn full_personalization_flow() {
    let w = world();
    let now = t0() + Duration::hours(1);
    let m3 = w.store.get_message(MessageId(3)).unwrap().unwrap();

    // 1. Collaborative predictions from co-rated messages
    let mut computer = UserMessageComputer::new(w.config.collaborative.clone());
    let table = run_computer(&mut computer, w.store.as_ref(), &w.counters).unwrap().clone();
    assert!((table.get(UserId(1), MessageId(3)).unwrap() - 0.875).abs() < 1e-12);
    w.scorer.set_collaborative_scores(table);

    // 2. Score: user 1 knows "rust" but not "wasm"
    let score = w.scorer.score(&m3, UserId(1), now).unwrap();
    assert!(score.participates);
    assert!(!score.adapted_used);
    assert_eq!(score.missing_terms, vec![Term::word("wasm")]);
    assert!((score.features.get(Feature::ContentMatch).unwrap() - 0.375).abs() < 1e-12);
    assert!((score.score - 0.575).abs() < 1e-12);

    // 3. Adapt the missing term from similar users
    let selector = StoredInterestSelector::from_config(
        Box::new(TermUserSimilarity::new(ModelType::default())),
        &w.config.similarity,
        &w.config.adaptation,
    );
    let adapter = DirectedUserModelAdapter::new(
        ModelType::default(),
        Arc::new(selector),
        w.counters.clone(),
    );
    let queue = RescoreQueue::new();
    let request = w.scorer.adaptation_request(&score).unwrap();
    let report = adapter.adapt(w.store.as_ref(), &request, &queue, now).unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.similar_users, 2);
    assert!(report.rescored);
    assert_eq!(queue.drain(), vec![(UserId(1), MessageId(3))]);
    let wasm = entry(&w.store, 1, "wasm").unwrap();
    assert!(wasm.adapted);
    assert!((wasm.weight() - 0.875).abs() < 1e-12);

    // 4. Rescore uses the adapted entry
    let rescored = w.scorer.score(&m3, UserId(1), now).unwrap();
    assert!(rescored.adapted_used);
    assert!(rescored.missing_terms.is_empty());
    assert!(rescored.score > score.score);

    // 5. Organic evidence takes over the adapted entry
    w.learner
        .learn(LearningMessage::rating(m3.clone(), UserId(1), Interest::High, now))
        .unwrap();
    let wasm = entry(&w.store, 1, "wasm").unwrap();
    assert!(!wasm.adapted);
    assert!((wasm.weight() - 0.75).abs() < 1e-12);

    // 6. Cleanup drops entries without evidence
    let model = w
        .store
        .get_or_create_user_model(UserId(2), &ModelType::default())
        .unwrap();
    w.store
        .store_or_update_entries(&model, &[UserModelEntry::new(ScoredTerm::new(Term::word("cobol"), 0.3))])
        .unwrap();
    let cleaned = cleanup(w.store.as_ref(), &ModelType::default(), &w.counters).unwrap();
    assert_eq!(cleaned.models_scanned, 3);
    assert_eq!(cleaned.entries_removed, 1);
    assert_eq!(cleaned.terms_removed, 1);
    assert!(entry(&w.store, 1, "wasm").is_some());

    let snap = w.counters.snapshot();
    assert_eq!(snap.messages_scored, 2);
    assert_eq!(snap.observations_learned, 7);
    assert_eq!(snap.entries_adapted, 1);
    assert!(snap.to_prometheus().contains("attune_entries_adapted_total 1"));
}

// ---------------------------------------------------------------------------
// Rating replacement keeps the model consistent with the latest rating
// ---------------------------------------------------------------------------

#[test]
fn rerating_matches_a_single_rating() {
    let w = world();
    let m2 = w.store.get_message(MessageId(2)).unwrap().unwrap();

    let report = w
        .learner
        .learn(LearningMessage::rating(m2, UserId(2), Interest::Low, t0()))
        .unwrap();
    assert!(report.replaced.is_some());

    // tokio only ever came from m2: its single rating is now LOW.
    assert!(entry(&w.store, 2, "tokio").is_none());
    let rust = entry(&w.store, 2, "rust").unwrap();
    assert!((rust.score_count - 1.0).abs() < 1e-12);
    assert!((rust.score_sum - 1.25).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// Term-based and combining computers
// ---------------------------------------------------------------------------

#[test]
fn term_based_computers_predict_unrated_messages() {
    let w = world();

    let mut per_group = UserTermPerGroupComputer::new(w.config.collaborative.clone());
    let per_group_table = run_computer(&mut per_group, w.store.as_ref(), &w.counters)
        .unwrap()
        .clone();
    assert!(per_group_table.get(UserId(1), MessageId(2)).is_some());

    let groups = Arc::new(GroupSimilarityComputer::from_config(&w.config.similarity, w.counters.clone()));
    let mut combining = CombiningComputer::new(w.config.collaborative.clone(), groups.clone());
    let first = run_computer(&mut combining, w.store.as_ref(), &w.counters)
        .unwrap()
        .clone();

    let mut again = CombiningComputer::new(w.config.collaborative.clone(), groups);
    again.init(w.store.as_ref()).unwrap();
    again.run().unwrap();

    assert_eq!(&first, again.message_scores());
    assert_eq!(
        first.get(UserId(1), MessageId(2)),
        per_group_table.get(UserId(1), MessageId(2))
    );
}

#[test]
fn group_similarity_weights_cross_group_predictions() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let mut config = AttuneConfig::default();
    config.collaborative.merge = MergeStrategy::WeightedByGroupSimilarity;
    let counters = Arc::new(PipelineCounters::new());
    let learner = LearnerChain::new(store.clone(), &config, counters.clone()).unwrap();

    let grouped = |id: u64, group: u64, words: &[&str]| {
        let terms = words.iter().map(|w| ScoredTerm::new(Term::word(w), 1.0)).collect();
        Message::new(MessageId(id), t0(), terms).in_group(MessageGroupId(group))
    };
    // Group 1 terms {rust, async, tokio}; group 2 {rust, async}; group 3 {rust, gc}.
    let messages = [
        grouped(1, 1, &["rust", "async"]),
        grouped(2, 1, &["rust", "tokio"]),
        grouped(10, 2, &["rust", "async"]),
        grouped(20, 3, &["rust", "gc"]),
        grouped(21, 3, &["rust"]),
    ];
    for m in &messages {
        store.insert_message(m.clone());
    }
    let ratings = [
        (1, 10, Interest::High),
        (2, 10, Interest::Extreme),
        (1, 20, Interest::Normal),
        (3, 20, Interest::Normal),
        (3, 21, Interest::None),
        (4, 1, Interest::Normal),
        (4, 2, Interest::Normal),
    ];
    for (user, id, interest) in ratings {
        let m = messages.iter().find(|m| m.id == MessageId(id)).unwrap().clone();
        learner
            .learn(LearningMessage::rating(m, UserId(user), interest, t0()))
            .unwrap();
    }

    let now = t0() + Duration::hours(1);
    let groups = Arc::new(GroupSimilarityComputer::from_config(&config.similarity, counters.clone()));
    let near = groups
        .similarity(store.as_ref(), MessageGroupId(1), MessageGroupId(2), now)
        .unwrap();
    let far = groups
        .similarity(store.as_ref(), MessageGroupId(1), MessageGroupId(3), now)
        .unwrap();
    assert!((near.similarity - 2.0 / 3.0).abs() < 1e-12);
    assert!((far.similarity - 0.25).abs() < 1e-12);

    let mut combining = CombiningComputer::new(config.collaborative.clone(), groups).as_of(now);
    let table = run_computer(&mut combining, store.as_ref(), &counters).unwrap().clone();

    // Group 2 predicts rust at 1.0 from user 2; group 3 predicts -0.25 from user 3.
    let expected = (near.similarity * 1.0 + far.similarity * -0.25)
        / (near.similarity + far.similarity);
    let blended = table.get(UserId(1), MessageId(2)).unwrap();
    assert!((blended - expected).abs() < 1e-12, "blended {blended}");
    assert!((blended - 29.0 / 44.0).abs() < 1e-12);
}

#[test]
fn time_binned_scoring_decays_evidence_learned_out_of_order() {
    init_tracing();
    let day = |n: i64| Utc.timestamp_millis_opt(n * DAY_MS).single().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let mut config = AttuneConfig::default();
    config.integration.strategy = StrategyKind::TimeBinned;
    let counters = Arc::new(PipelineCounters::new());
    let learner = LearnerChain::new(store.clone(), &config, counters.clone()).unwrap();
    let scorer = ScorerChain::new(store.clone(), &config, counters).unwrap();

    let dated = |id: u64, n: i64| {
        Message::new(MessageId(id), day(n), vec![ScoredTerm::new(Term::word("rust"), 1.0)])
            .in_group(MessageGroupId(1))
    };
    // The recent rating arrives before two old ones.
    let history = [
        (dated(1, 30), Interest::Normal, 30),
        (dated(2, 0), Interest::Extreme, 0),
        (dated(3, 0), Interest::Extreme, 0),
    ];
    for (m, interest, n) in history {
        store.insert_message(m.clone());
        learner
            .learn(LearningMessage::rating(m, UserId(1), interest, day(n)))
            .unwrap();
    }

    // Learned as of day 0, the day-30 bucket still counted in full.
    let stored = entry(&store, 1, "rust").unwrap();
    assert!((stored.weight() - 2.5 / 3.0).abs() < 1e-12);

    let score = scorer.score(&dated(4, 30), UserId(1), day(30)).unwrap();
    let old = DecayFunction::new(config.integration.decay_cutoff_ms)
        .unwrap()
        .decay(30 * DAY_MS)
        .unwrap();
    let expected = (2.0 * old + 0.5) / (2.0 * old + 1.0);
    let content = score.features.get(Feature::ContentMatch).unwrap();
    assert!((content - expected).abs() < 1e-12, "content {content}");
    assert!(content < stored.weight());
}
