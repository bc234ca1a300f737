//! Command chains.
//!
//! A chain is an ordered list of stages run strictly in sequence over one
//! mutable context. Later stages read what earlier ones wrote, so each
//! stage checks its preconditions on entry and fails with
//! [`AttuneError::InvariantViolation`] when they do not hold.
//!
//! Two chains are assembled from this:
//!
//! - [`ScorerChain`]: scores one message for one user.
//! - [`LearnerChain`]: integrates one observation into a user model.
//!
//! Units of work (one message, one user) are independent and may run in
//! parallel; learning for the same user must be serialized by the caller,
//! e.g. with [`UserLocks`].

pub mod learner;
pub mod locks;
pub mod scorer;

pub use learner::{LearnContext, LearnReport, LearnerChain};
pub use locks::UserLocks;
pub use scorer::{MessageScore, ScoreContext, ScorerChain};

use tracing::debug_span;

use crate::error::{AttuneError, Result};
use crate::metrics::spans;

/// One stage of a chain.
pub trait Command<C>: Send + Sync {
    /// Stage name for spans and errors.
    fn name(&self) -> &'static str;

    /// Run the stage against `context`.
    ///
    /// # Errors
    /// Returns [`AttuneError::InvariantViolation`] when a precondition does
    /// not hold; otherwise stage specific.
    fn execute(&self, context: &mut C) -> Result<()>;
}

/// An ordered sequence of [`Command`]s.
pub struct CommandChain<C> {
    name: &'static str,
    commands: Vec<Box<dyn Command<C>>>,
}

impl<C> std::fmt::Debug for CommandChain<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChain")
            .field("name", &self.name)
            .field("commands", &self.names())
            .finish()
    }
}

impl<C> CommandChain<C> {
    /// An empty chain.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            commands: Vec::new(),
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn with(mut self, command: impl Command<C> + 'static) -> Self {
        self.commands.push(Box::new(command));
        self
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run every stage in order, stopping at the first error.
    ///
    /// # Errors
    /// The first stage error.
    pub fn run(&self, context: &mut C) -> Result<()> {
        for command in &self.commands {
            let span = debug_span!(spans::STAGE, chain = self.name, stage = command.name());
            let _guard = span.enter();
            command.execute(context)?;
        }
        Ok(())
    }
}

/// Fail with an invariant violation unless `holds`.
pub(crate) fn require(holds: bool, stage: &str, what: &str) -> Result<()> {
    if holds {
        Ok(())
    } else {
        Err(AttuneError::InvariantViolation(format!(
            "stage `{stage}` requires {what}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Push(&'static str);

    impl Command<Vec<&'static str>> for Push {
        fn name(&self) -> &'static str {
            self.0
        }

        fn execute(&self, context: &mut Vec<&'static str>) -> Result<()> {
            context.push(self.0);
            Ok(())
        }
    }

    struct NeedsTwo;

    impl Command<Vec<&'static str>> for NeedsTwo {
        fn name(&self) -> &'static str {
            "needs_two"
        }

        fn execute(&self, context: &mut Vec<&'static str>) -> Result<()> {
            require(context.len() >= 2, self.name(), "two earlier stages")
        }
    }

    #[test]
    fn stages_run_in_order() {
        let chain = CommandChain::new("test").with(Push("a")).with(Push("b")).with(NeedsTwo);
        let mut seen = Vec::new();
        chain.run(&mut seen).unwrap();
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(chain.names(), vec!["a", "b", "needs_two"]);
    }

    #[test]
    fn violated_precondition_stops_the_chain() {
        let chain = CommandChain::new("test").with(NeedsTwo).with(Push("never"));
        let mut seen = Vec::new();
        assert!(matches!(
            chain.run(&mut seen),
            Err(AttuneError::InvariantViolation(_))
        ));
        assert!(seen.is_empty());
    }
}
