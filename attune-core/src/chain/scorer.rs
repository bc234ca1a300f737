//! The scorer chain: one message, one user, one score.
//!
//! Stages, in order:
//!
//! | Stage | Writes |
//! |---|---|
//! | `load_entries` | user model and the entries for the message's terms |
//! | `content_match` | content feature, `adapted_used`, missing terms |
//! | `collaborative_match` | collaborative feature, when predicted |
//! | `discussion_participation` | participation flag and feature |
//! | `recency` | recency feature |
//! | `aggregate` | score, down-weighted without participation |
//! | `validate` | whether the score is positive enough to learn from |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::adaptation::AdaptationRequest;
use crate::aggregation::{
    Feature, FeatureAggregate, LinearFeatureAggregator, ThresholdValidator, apply_participation,
};
use crate::chain::{Command, CommandChain, require};
use crate::collaborative::CollaborativeScoreTable;
use crate::config::AttuneConfig;
use crate::decay::DecayFunction;
use crate::error::Result;
use crate::integration::{IntegrationStrategy, TimeBinnedStrategy};
use crate::metrics::{PipelineCounters, spans};
use crate::model::{ModelType, UserModel, UserModelEntry};
use crate::similarity::{TermImportance, TermImportanceKind, TermVectorSimilarity};
use crate::store::{MessageFilter, Store};
use crate::types::{Message, MessageGroupId, MessageId, Term, UserId, millis_between};

/// Working state of one scorer run.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    /// The message being scored.
    pub message: Message,
    /// The user it is scored for.
    pub user_id: UserId,
    /// Reference time for recency and time-bin decay.
    pub now: DateTime<Utc>,
    /// The user's model, once loaded.
    pub model: Option<UserModel>,
    /// The user's entries for the message's terms, once loaded.
    pub entries: Option<BTreeMap<Term, UserModelEntry>>,
    /// Computed features.
    pub features: FeatureAggregate,
    /// Whether the user participates in the message's discussion.
    pub participates: Option<bool>,
    /// Whether any adapted entry contributed to the content match.
    pub adapted_used: bool,
    /// Message terms without an entry in the user's model.
    pub missing_terms: Vec<Term>,
    /// The aggregated score.
    pub score: Option<f64>,
    /// Whether every feature met its minimum.
    pub learnable: Option<bool>,
}

impl ScoreContext {
    /// A fresh context.
    #[must_use]
    pub fn new(message: Message, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            message,
            user_id,
            now,
            model: None,
            entries: None,
            features: FeatureAggregate::new(),
            participates: None,
            adapted_used: false,
            missing_terms: Vec::new(),
            score: None,
            learnable: None,
        }
    }
}

/// Result of scoring one message for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageScore {
    /// The user.
    pub user_id: UserId,
    /// The message.
    pub message_id: MessageId,
    /// The message's group.
    pub group_id: MessageGroupId,
    /// Final score.
    pub score: f64,
    /// Feature values behind the score.
    pub features: FeatureAggregate,
    /// Whether the score is positive enough to learn from.
    pub learnable: bool,
    /// Whether the user participates in the discussion.
    pub participates: bool,
    /// Whether adapted (borrowed) entries contributed.
    pub adapted_used: bool,
    /// Message terms the user's model lacks.
    pub missing_terms: Vec<Term>,
}

impl MessageScore {
    /// An adaptation request for the missing terms, if there are any.
    #[must_use]
    pub fn adaptation_request(&self) -> Option<AdaptationRequest> {
        (!self.missing_terms.is_empty()).then(|| AdaptationRequest {
            user_id: self.user_id,
            message_id: self.message_id,
            group_id: self.group_id,
            missing_terms: self.missing_terms.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

struct LoadEntries {
    store: Arc<dyn Store>,
    model_type: ModelType,
    binning: Option<TimeBinnedStrategy>,
}

impl Command<ScoreContext> for LoadEntries {
    fn name(&self) -> &'static str {
        "load_entries"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        let model = self.store.get_or_create_user_model(ctx.user_id, &self.model_type)?;
        let terms: Vec<Term> = ctx.message.term_keys().cloned().collect();
        let mut entries = self.store.get_user_model_entries_for_terms(&model, &terms)?;
        if let Some(binning) = &self.binning {
            for entry in entries.values_mut().filter(|e| !e.time_bins.is_empty()) {
                binning.consolidate_by_time_bins(entry, ctx.now)?;
            }
        }
        ctx.model = Some(model);
        ctx.entries = Some(entries);
        Ok(())
    }
}

struct ContentMatch {
    similarity: Arc<TermVectorSimilarity>,
}

impl Command<ScoreContext> for ContentMatch {
    fn name(&self) -> &'static str {
        "content_match"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        let Some(entries) = ctx.entries.as_ref() else {
            return require(false, self.name(), "loaded entries");
        };
        let message = &ctx.message;

        let value =
            self.similarity
                .get_similarity(message.group_or_ungrouped(), entries, &message.terms);
        let adapted_used = message
            .term_keys()
            .any(|t| entries.get(t).is_some_and(|e| e.adapted));
        let missing: BTreeSet<Term> = message
            .term_keys()
            .filter(|t| !entries.contains_key(*t))
            .cloned()
            .collect();

        ctx.adapted_used = adapted_used;
        ctx.missing_terms = missing.into_iter().collect();
        ctx.features.set(Feature::ContentMatch, value);
        Ok(())
    }
}

struct CollaborativeMatch {
    scores: Arc<RwLock<CollaborativeScoreTable>>,
}

impl Command<ScoreContext> for CollaborativeMatch {
    fn name(&self) -> &'static str {
        "collaborative_match"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        match self.scores.read().get(ctx.user_id, ctx.message.id) {
            Some(value) => ctx.features.set(Feature::CollaborativeMatch, value),
            None => debug!(user = %ctx.user_id, message = %ctx.message.id, "No collaborative prediction"),
        }
        Ok(())
    }
}

struct DiscussionParticipation {
    store: Arc<dyn Store>,
}

impl Command<ScoreContext> for DiscussionParticipation {
    fn name(&self) -> &'static str {
        "discussion_participation"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        let participates = ctx.message.is_root()
            || ctx.message.author == Some(ctx.user_id)
            || !self
                .store
                .get_messages(
                    &MessageFilter::all()
                        .in_discussion(ctx.message.discussion_id())
                        .by_author(ctx.user_id),
                )?
                .is_empty();
        ctx.participates = Some(participates);
        ctx.features.set(
            Feature::DiscussionParticipation,
            if participates { 1.0 } else { 0.0 },
        );
        Ok(())
    }
}

struct Recency {
    decay: DecayFunction,
}

impl Command<ScoreContext> for Recency {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        let age = millis_between(ctx.message.published, ctx.now).max(0);
        ctx.features.set(Feature::Recency, self.decay.decay(age)?);
        Ok(())
    }
}

struct Aggregate {
    aggregator: LinearFeatureAggregator,
    non_participation_factor: f64,
}

impl Command<ScoreContext> for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        require(
            ctx.features.get(Feature::ContentMatch).is_some(),
            self.name(),
            "the content match feature",
        )?;
        require(ctx.participates.is_some(), self.name(), "the participation flag")?;
        let raw = self.aggregator.aggregate(&ctx.features);
        let participates = ctx.participates.unwrap_or(true);
        ctx.score = Some(apply_participation(raw, participates, self.non_participation_factor));
        Ok(())
    }
}

struct Validate {
    validator: ThresholdValidator,
}

impl Command<ScoreContext> for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn execute(&self, ctx: &mut ScoreContext) -> Result<()> {
        require(ctx.score.is_some(), self.name(), "an aggregated score")?;
        ctx.learnable = Some(self.validator.is_learnable(&ctx.features));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Scores messages for users.
pub struct ScorerChain {
    chain: CommandChain<ScoreContext>,
    similarity: Arc<TermVectorSimilarity>,
    importance: TermImportanceKind,
    collaborative: Arc<RwLock<CollaborativeScoreTable>>,
    adaptation_enabled: bool,
    counters: Arc<PipelineCounters>,
}

impl std::fmt::Debug for ScorerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorerChain")
            .field("chain", &self.chain)
            .field("importance", &self.importance)
            .finish_non_exhaustive()
    }
}

impl ScorerChain {
    /// Assemble the chain from configuration.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` for invalid weights, minimums or
    /// cutoffs.
    pub fn new(
        store: Arc<dyn Store>,
        config: &AttuneConfig,
        counters: Arc<PipelineCounters>,
    ) -> Result<Self> {
        let similarity = Arc::new(TermVectorSimilarity::from_config(&config.similarity));
        let collaborative = Arc::new(RwLock::new(CollaborativeScoreTable::new()));
        let binning = match IntegrationStrategy::from_config(&config.integration)? {
            IntegrationStrategy::TimeBinned(s) => Some(s),
            _ => None,
        };

        let chain = CommandChain::new("scorer")
            .with(LoadEntries {
                store: Arc::clone(&store),
                model_type: ModelType::new(config.general.model_type.clone()),
                binning,
            })
            .with(ContentMatch {
                similarity: Arc::clone(&similarity),
            })
            .with(CollaborativeMatch {
                scores: Arc::clone(&collaborative),
            })
            .with(DiscussionParticipation { store })
            .with(Recency {
                decay: DecayFunction::new(config.scoring.recency_cutoff_ms)?,
            })
            .with(Aggregate {
                aggregator: LinearFeatureAggregator::new(config.scoring.feature_weights.clone())?,
                non_participation_factor: config.scoring.non_participation_factor,
            })
            .with(Validate {
                validator: ThresholdValidator::new(config.scoring.feature_minimums.clone())?,
            });

        Ok(Self {
            chain,
            similarity,
            importance: config.similarity.term_importance,
            collaborative,
            adaptation_enabled: config.adaptation.enabled,
            counters,
        })
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Replace the collaborative predictions consulted by the chain.
    pub fn set_collaborative_scores(&self, scores: CollaborativeScoreTable) {
        *self.collaborative.write() = scores;
    }

    /// Recount global term importance over every stored message.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn refresh_term_importance(&self, store: &dyn Store) -> Result<()> {
        let messages = store.get_messages(&MessageFilter::all())?;
        self.similarity
            .set_importance(TermImportance::from_messages(self.importance, &messages));
        Ok(())
    }

    /// The adaptation to request for `score`, unless adaptation is
    /// disabled or the user's model covered every term.
    #[must_use]
    pub fn adaptation_request(&self, score: &MessageScore) -> Option<AdaptationRequest> {
        if !self.adaptation_enabled {
            return None;
        }
        score.adaptation_request()
    }

    /// Score `message` for `user` as of `now`.
    ///
    /// # Errors
    /// Propagates store failures and stage invariant violations.
    pub fn score(&self, message: &Message, user: UserId, now: DateTime<Utc>) -> Result<MessageScore> {
        let span = debug_span!(spans::SCORE, user = %user, message = %message.id);
        let _guard = span.enter();

        let mut ctx = ScoreContext::new(message.clone(), user, now);
        self.chain.run(&mut ctx)?;
        require(ctx.learnable.is_some(), "scorer", "a validated score")?;
        PipelineCounters::add(&self.counters.messages_scored, 1);

        let score = MessageScore {
            user_id: user,
            message_id: message.id,
            group_id: message.group_or_ungrouped(),
            score: ctx.score.unwrap_or_default(),
            features: ctx.features,
            learnable: ctx.learnable.unwrap_or(false),
            participates: ctx.participates.unwrap_or(false),
            adapted_used: ctx.adapted_used,
            missing_terms: ctx.missing_terms,
        };
        debug!(
            score = score.score,
            learnable = score.learnable,
            adapted_used = score.adapted_used,
            missing = score.missing_terms.len(),
            "Scored message"
        );
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttuneError;
    use crate::store::InMemoryStore;
    use crate::types::ScoredTerm;

    fn scored(words: &[(&str, f64)]) -> Vec<ScoredTerm> {
        words
            .iter()
            .map(|(w, s)| ScoredTerm::new(Term::word(w), *s))
            .collect()
    }

    fn setup() -> (Arc<InMemoryStore>, ScorerChain) {
        let store = Arc::new(InMemoryStore::new());
        let model = store
            .get_or_create_user_model(UserId(1), &ModelType::default())
            .unwrap();
        let entries = [
            UserModelEntry::new(ScoredTerm::new(Term::word("rust"), 0.8)),
            UserModelEntry::adapted(Term::word("wasm"), 0.8),
        ];
        store.store_or_update_entries(&model, &entries).unwrap();
        let chain = ScorerChain::new(
            store.clone(),
            &AttuneConfig::default(),
            Arc::new(PipelineCounters::new()),
        )
        .unwrap();
        (store, chain)
    }

    #[test]
    fn root_message_scores_content_and_collaborative() {
        let (_store, chain) = setup();
        let now = Utc::now();
        let message = Message::new(MessageId(1), now, scored(&[("rust", 1.0)]));
        let mut table = CollaborativeScoreTable::new();
        table.record(UserId(1), MessageId(1), 0.4);
        chain.set_collaborative_scores(table);

        let result = chain.score(&message, UserId(1), now).unwrap();
        assert!((result.score - 0.64).abs() < 1e-12);
        assert!(result.participates);
        assert!(result.learnable);
        assert!(!result.adapted_used);
        assert!(result.adaptation_request().is_none());
    }

    #[test]
    fn non_participating_reply_is_down_weighted() {
        let (store, chain) = setup();
        let now = Utc::now();
        store.insert_message(Message::new(MessageId(1), now, vec![]).authored_by(UserId(2)));
        let reply = Message::new(MessageId(2), now, scored(&[("rust", 1.0)]))
            .authored_by(UserId(3))
            .reply_to(MessageId(1), MessageId(1));
        let mut table = CollaborativeScoreTable::new();
        table.record(UserId(1), MessageId(2), 0.4);
        chain.set_collaborative_scores(table);

        let result = chain.score(&reply, UserId(1), now).unwrap();
        assert!(!result.participates);
        assert!((result.score - 0.32).abs() < 1e-12);

        store.insert_message(
            Message::new(MessageId(3), now, vec![])
                .authored_by(UserId(1))
                .reply_to(MessageId(1), MessageId(1)),
        );
        assert!(chain.score(&reply, UserId(1), now).unwrap().participates);
    }

    #[test]
    fn records_adapted_use_and_missing_terms() {
        let (_store, chain) = setup();
        let now = Utc::now();
        let message = Message::new(
            MessageId(5),
            now,
            scored(&[("wasm", 1.0), ("zig", 1.0), ("zig", 0.5)]),
        )
        .in_group(MessageGroupId(4));

        let result = chain.score(&message, UserId(1), now).unwrap();
        assert!(result.adapted_used);
        assert_eq!(result.missing_terms, vec![Term::word("zig")]);
        let request = result.adaptation_request().unwrap();
        assert_eq!(request.group_id, MessageGroupId(4));
    }

    #[test]
    fn adaptation_requests_follow_configuration() {
        let message = Message::new(MessageId(5), Utc::now(), scored(&[("zig", 1.0)]));
        let (_store, enabled) = setup();
        let result = enabled.score(&message, UserId(1), Utc::now()).unwrap();
        assert!(enabled.adaptation_request(&result).is_some());

        let mut config = AttuneConfig::default();
        config.adaptation.enabled = false;
        let disabled =
            ScorerChain::new(Arc::new(InMemoryStore::new()), &config, Arc::new(PipelineCounters::new()))
                .unwrap();
        let result = disabled.score(&message, UserId(1), Utc::now()).unwrap();
        assert_eq!(result.missing_terms, vec![Term::word("zig")]);
        assert!(disabled.adaptation_request(&result).is_none());
    }

    #[test]
    fn time_bins_are_reconsolidated_at_score_time() {
        use crate::decay::DAY_MS;
        use crate::integration::StrategyKind;
        use crate::model::TimeBin;
        use chrono::TimeZone;

        let day = |n: i64| Utc.timestamp_millis_opt(n * DAY_MS).single().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let model = store
            .get_or_create_user_model(UserId(1), &ModelType::default())
            .unwrap();
        // Weight 0.9 is stale; only the bins carry the evidence.
        let mut entry = UserModelEntry::new(ScoredTerm::new(Term::word("rust"), 0.9));
        entry.time_bins.insert(0, TimeBin { count: 1, sum: 1.0 });
        entry.time_bins.insert(10, TimeBin { count: 1, sum: -0.5 });
        store.store_or_update_entries(&model, &[entry]).unwrap();

        let mut config = AttuneConfig::default();
        config.integration.strategy = StrategyKind::TimeBinned;
        config.integration.decay_cutoff_ms = DAY_MS;
        let chain = ScorerChain::new(store.clone(), &config, Arc::new(PipelineCounters::new())).unwrap();

        let message = Message::new(MessageId(1), day(10), scored(&[("rust", 1.0)]));
        let result = chain.score(&message, UserId(1), day(10)).unwrap();

        let old = DecayFunction::new(DAY_MS).unwrap().decay(10 * DAY_MS).unwrap();
        let expected = (old - 0.5) / (old + 1.0);
        let content = result.features.get(Feature::ContentMatch).unwrap();
        assert!((content - expected).abs() < 1e-12, "content {content}");

        let stored = store.get_all_entries(&model).unwrap();
        assert!((stored[&Term::word("rust")].weight() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregation_without_content_match_is_rejected() {
        let aggregate = Aggregate {
            aggregator: LinearFeatureAggregator::new(BTreeMap::new()).unwrap(),
            non_participation_factor: 0.5,
        };
        let mut ctx = ScoreContext::new(Message::new(MessageId(1), Utc::now(), vec![]), UserId(1), Utc::now());
        assert!(matches!(
            aggregate.execute(&mut ctx),
            Err(AttuneError::InvariantViolation(_))
        ));
    }

    #[test]
    fn stage_order_is_fixed() {
        let (_store, chain) = setup();
        assert_eq!(
            chain.stage_names(),
            vec![
                "load_entries",
                "content_match",
                "collaborative_match",
                "discussion_participation",
                "recency",
                "aggregate",
                "validate",
            ]
        );
    }
}
