//! User → Message collaborative filtering.
//!
//! Messages are opaque items. A user's predicted interest in a message is
//! the similarity-weighted mean of their neighbours' scores for it.

use tracing::debug;

use crate::collaborative::knn::{self, Rows};
use crate::collaborative::{
    CollaborativeScoreComputer, CollaborativeScoreTable, PreferenceMatrix, RunOutput,
    not_initialized,
};
use crate::config::CollaborativeConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::MessageId;

/// Predicts from co-rated messages.
#[derive(Debug, Clone, Default)]
pub struct UserMessageComputer {
    config: CollaborativeConfig,
    matrix: Option<PreferenceMatrix>,
    output: RunOutput,
}

impl UserMessageComputer {
    /// Create an uninitialized computer.
    #[must_use]
    pub fn new(config: CollaborativeConfig) -> Self {
        Self {
            config,
            matrix: None,
            output: RunOutput::default(),
        }
    }
}

impl CollaborativeScoreComputer for UserMessageComputer {
    fn name(&self) -> &'static str {
        "user_message"
    }

    fn init(&mut self, store: &dyn Store) -> Result<()> {
        let matrix = PreferenceMatrix::load(store, self.config.observation_policy)?;
        debug!(users = matrix.users().count(), scores = matrix.len(), "Loaded preference matrix");
        self.matrix = Some(matrix);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let matrix = self.matrix.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        let rows: &Rows<MessageId> = matrix.rows();
        let neighbourhoods =
            knn::neighbourhoods(rows, self.config.min_co_rated, self.config.max_neighbours);
        let messages = matrix.messages();

        let mut output = RunOutput::default();
        for (user, row) in rows {
            let neighbours = neighbourhoods.get(user).map_or(&[][..], Vec::as_slice);
            for message in messages.iter().filter(|m| !row.contains_key(m)) {
                output.push(*user, *message, knn::predict(rows, neighbours, message));
            }
        }
        self.output = output;
        Ok(())
    }

    fn message_scores(&self) -> &CollaborativeScoreTable {
        &self.output.scores
    }

    fn nan_scores(&self) -> usize {
        self.output.nan
    }
}
