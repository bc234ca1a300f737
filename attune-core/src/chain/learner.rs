//! The learner chain: one observed reaction, one user model update.
//!
//! A rating for a (user, message) that already carries a rating replaces
//! it: the old interest is disintegrated before the new one is integrated.
//! The same holds for an explicitly superseded observation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::chain::{Command, CommandChain, require};
use crate::config::AttuneConfig;
use crate::error::{AttuneError, Result};
use crate::integration::IntegrationStrategy;
use crate::metrics::{PipelineCounters, spans};
use crate::model::{EntryArena, ModelType, UserModel};
use crate::store::Store;
use crate::types::{LearningMessage, Observation, ObservationId, ObservationType, Term};

/// Working state of one learner run.
#[derive(Debug, Clone)]
pub struct LearnContext {
    /// The reaction being learned.
    pub learning: LearningMessage,
    /// The user's model, once resolved.
    pub model: Option<UserModel>,
    /// Entries for the message's terms, once loaded.
    pub arena: Option<EntryArena>,
    /// The observation to store.
    pub observation: Option<Observation>,
    /// The observation being replaced, if any.
    pub replaced: Option<Observation>,
    /// Entries created so far.
    pub created: usize,
    /// Entries updated so far.
    pub updated: usize,
    /// Entries deleted so far.
    pub deleted: usize,
}

impl LearnContext {
    /// A fresh context.
    #[must_use]
    pub fn new(learning: LearningMessage) -> Self {
        Self {
            learning,
            model: None,
            arena: None,
            observation: None,
            replaced: None,
            created: 0,
            updated: 0,
            deleted: 0,
        }
    }
}

/// What one learner run changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnReport {
    /// The stored observation.
    pub observation_id: ObservationId,
    /// Entries created.
    pub created: usize,
    /// Entries updated.
    pub updated: usize,
    /// Entries deleted.
    pub deleted: usize,
    /// The observation whose interest was unlearned first.
    pub replaced: Option<ObservationId>,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

struct ResolveModel {
    store: Arc<dyn Store>,
    model_type: ModelType,
}

impl Command<LearnContext> for ResolveModel {
    fn name(&self) -> &'static str {
        "resolve_model"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        ctx.model = Some(
            self.store
                .get_or_create_user_model(ctx.learning.user_id, &self.model_type)?,
        );
        Ok(())
    }
}

struct LoadEntries {
    store: Arc<dyn Store>,
}

impl Command<LearnContext> for LoadEntries {
    fn name(&self) -> &'static str {
        "load_entries"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        let Some(model) = ctx.model.clone() else {
            return require(false, self.name(), "a resolved user model");
        };
        let terms: Vec<Term> = ctx.learning.message.term_keys().cloned().collect();
        ctx.arena = Some(EntryArena::load(self.store.as_ref(), model, &terms)?);
        Ok(())
    }
}

struct PrepareObservation {
    store: Arc<dyn Store>,
    counters: Arc<PipelineCounters>,
}

impl PrepareObservation {
    fn find_replaced(&self, learning: &LearningMessage) -> Result<Option<Observation>> {
        if let Some(related) = learning.related_observation_id {
            let Some(observation) = self.store.get_observation(related)? else {
                warn!(
                    observation = %related,
                    user = %learning.user_id,
                    "Superseded observation not found, learning without replacement"
                );
                PipelineCounters::add(&self.counters.missing_data_recovered, 1);
                return Ok(None);
            };
            if observation.user_id != learning.user_id
                || observation.message_id != learning.message.id
            {
                return Err(AttuneError::InvalidArgument(format!(
                    "observation {related} belongs to user {} and message {}, not {} and {}",
                    observation.user_id,
                    observation.message_id,
                    learning.user_id,
                    learning.message.id
                )));
            }
            return Ok(Some(observation));
        }

        if learning.observation_type != ObservationType::Rating {
            return Ok(None);
        }
        Ok(self
            .store
            .get_observations(
                Some(learning.user_id),
                Some(learning.message.id),
                Some(ObservationType::Rating),
            )?
            .pop())
    }
}

impl Command<LearnContext> for PrepareObservation {
    fn name(&self) -> &'static str {
        "prepare_observation"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        let learning = &ctx.learning;
        let mut observation = Observation::new(
            learning.user_id,
            learning.message.id,
            learning.observation_type,
            learning.interest,
            learning.date,
        );
        let replaced = self.find_replaced(learning)?;
        if let Some(old) = &replaced {
            debug!(replaced = %old.id, interest = ?old.interest, "Replacing earlier observation");
            observation = observation.superseding(old.id);
        }
        ctx.observation = Some(observation);
        ctx.replaced = replaced;
        Ok(())
    }
}

struct Unlearn {
    strategy: IntegrationStrategy,
}

impl Command<LearnContext> for Unlearn {
    fn name(&self) -> &'static str {
        "unlearn_replaced"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        require(ctx.observation.is_some(), self.name(), "a prepared observation")?;
        let Some(replaced) = ctx.replaced.as_ref() else {
            return Ok(());
        };
        let Some(arena) = ctx.arena.as_mut() else {
            return require(false, self.name(), "loaded entries");
        };
        let interest = replaced.interest.score();

        for scored in &ctx.learning.message.terms {
            let Some(entry) = arena.get_mut(&scored.term) else {
                continue;
            };
            if self
                .strategy
                .disintegrate(entry, interest, scored, replaced.date)?
            {
                arena.remove(&scored.term);
                ctx.deleted += 1;
            }
        }
        Ok(())
    }
}

struct Integrate {
    strategy: IntegrationStrategy,
}

impl Command<LearnContext> for Integrate {
    fn name(&self) -> &'static str {
        "integrate"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        require(ctx.observation.is_some(), self.name(), "a prepared observation")?;
        let (Some(model), Some(arena)) = (ctx.model.as_ref(), ctx.arena.as_mut()) else {
            return require(false, self.name(), "a resolved model and loaded entries");
        };
        let learning = &ctx.learning;
        let interest = learning.interest.score();

        for scored in &learning.message.terms {
            if let Some(entry) = arena.get_mut(&scored.term) {
                if self
                    .strategy
                    .integrate(entry, interest, scored, learning.date)?
                {
                    arena.remove(&scored.term);
                    ctx.deleted += 1;
                } else {
                    ctx.updated += 1;
                }
                continue;
            }

            let Some(mut entry) = self
                .strategy
                .create_new(model, interest, scored, learning.date)
            else {
                continue;
            };
            if !self
                .strategy
                .integrate(&mut entry, interest, scored, learning.date)?
            {
                arena.insert(entry);
                ctx.created += 1;
            }
        }
        Ok(())
    }
}

struct Commit {
    store: Arc<dyn Store>,
}

impl Command<LearnContext> for Commit {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        let Some(arena) = ctx.arena.as_mut() else {
            return require(false, self.name(), "loaded entries");
        };
        arena.commit(self.store.as_ref())?;
        Ok(())
    }
}

struct StoreObservation {
    store: Arc<dyn Store>,
}

impl Command<LearnContext> for StoreObservation {
    fn name(&self) -> &'static str {
        "store_observation"
    }

    fn execute(&self, ctx: &mut LearnContext) -> Result<()> {
        let Some(observation) = ctx.observation.clone() else {
            return require(false, self.name(), "a prepared observation");
        };
        self.store.store_observation(observation)
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Integrates observed reactions into user models.
#[derive(Debug)]
pub struct LearnerChain {
    chain: CommandChain<LearnContext>,
    counters: Arc<PipelineCounters>,
}

impl LearnerChain {
    /// Assemble the chain from configuration.
    ///
    /// # Errors
    /// Returns `AttuneError::Config` for invalid integration settings.
    pub fn new(
        store: Arc<dyn Store>,
        config: &AttuneConfig,
        counters: Arc<PipelineCounters>,
    ) -> Result<Self> {
        let strategy = IntegrationStrategy::from_config(&config.integration)?;
        let chain = CommandChain::new("learner")
            .with(ResolveModel {
                store: Arc::clone(&store),
                model_type: ModelType::new(config.general.model_type.clone()),
            })
            .with(LoadEntries {
                store: Arc::clone(&store),
            })
            .with(PrepareObservation {
                store: Arc::clone(&store),
                counters: Arc::clone(&counters),
            })
            .with(Unlearn {
                strategy: strategy.clone(),
            })
            .with(Integrate { strategy })
            .with(Commit {
                store: Arc::clone(&store),
            })
            .with(StoreObservation { store });
        Ok(Self { chain, counters })
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Learn one reaction.
    ///
    /// Not synchronized per user; serialize calls for the same user, e.g.
    /// with [`crate::chain::UserLocks`].
    ///
    /// # Errors
    /// Propagates store failures, invalid superseded observations and
    /// stage invariant violations.
    pub fn learn(&self, learning: LearningMessage) -> Result<LearnReport> {
        let span = info_span!(
            spans::LEARN,
            user = %learning.user_id,
            message = %learning.message.id,
            relation = ?learning.relation.map(|r| r.kind),
        );
        let _guard = span.enter();

        let mut ctx = LearnContext::new(learning);
        self.chain.run(&mut ctx)?;
        let Some(observation) = ctx.observation.as_ref() else {
            return Err(AttuneError::InvariantViolation(
                "learner finished without an observation".to_string(),
            ));
        };

        let report = LearnReport {
            observation_id: observation.id,
            created: ctx.created,
            updated: ctx.updated,
            deleted: ctx.deleted,
            replaced: ctx.replaced.as_ref().map(|o| o.id),
        };

        let c = &self.counters;
        PipelineCounters::add(&c.observations_learned, 1);
        PipelineCounters::add(&c.observations_replaced, u64::from(report.replaced.is_some()));
        PipelineCounters::add(&c.entries_created, report.created as u64);
        PipelineCounters::add(&c.entries_updated, report.updated as u64);
        PipelineCounters::add(&c.entries_deleted, report.deleted as u64);

        info!(
            observation = %report.observation_id,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            replaced = report.replaced.is_some(),
            "Learned observation"
        );
        Ok(report)
    }
}
