//! Plain integration: the entry weight is the mean interest score.
//!
//! ```text
//! score_count += ±1          (sign of the interest)
//! score_sum   += interest
//! weight       = score_sum / score_count
//! ```

use crate::error::Result;
use crate::integration::{Direction, count_delta};
use crate::model::UserModelEntry;

/// Arithmetic-mean integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlainStrategy {
    pub(crate) min_term_weight: f64,
}

impl PlainStrategy {
    /// Create a plain strategy ignoring scored terms below `min_term_weight`.
    #[must_use]
    pub fn new(min_term_weight: f64) -> Self {
        Self { min_term_weight }
    }

    pub(crate) fn update(
        &self,
        entry: &mut UserModelEntry,
        interest: f64,
        direction: Direction,
    ) -> Result<bool> {
        entry.accumulate(count_delta(interest, direction), interest * direction.sign());
        entry.consolidate()?;
        Ok(entry.score_count <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::integration::{IntegrationStrategy, PlainStrategy};
    use crate::model::{ModelType, UserModel};
    use crate::types::{ScoredTerm, Term, UserId, UserModelId};
    use chrono::Utc;

    fn strategy() -> IntegrationStrategy {
        IntegrationStrategy::Plain(PlainStrategy::new(0.0))
    }

    fn model() -> UserModel {
        UserModel {
            id: UserModelId(1),
            user_id: UserId(1),
            model_type: ModelType::default(),
        }
    }

    #[test]
    fn mean_of_interest_sequence() {
        let s = strategy();
        let term = ScoredTerm::new(Term::word("rust"), 0.6);
        let now = Utc::now();
        let mut entry = s.create_new(&model(), 1.0, &term, now).unwrap();

        for interest in [1.0, 1.0, -0.5] {
            s.integrate(&mut entry, interest, &term, now).unwrap();
        }

        assert_eq!(entry.score_count, 1.0);
        assert_eq!(entry.score_sum, 1.5);
        assert_eq!(entry.weight(), 1.5);
    }

    #[test]
    fn disintegrate_restores_evidence() {
        let s = strategy();
        let term = ScoredTerm::new(Term::word("rust"), 0.6);
        let now = Utc::now();
        let mut entry = s.create_new(&model(), 1.0, &term, now).unwrap();
        s.integrate(&mut entry, 0.75, &term, now).unwrap();
        let (count, sum) = (entry.score_count, entry.score_sum);

        s.integrate(&mut entry, -0.5, &term, now).unwrap();
        s.disintegrate(&mut entry, -0.5, &term, now).unwrap();

        assert_eq!(entry.score_count, count);
        assert_eq!(entry.score_sum, sum);
    }

    #[test]
    fn negative_net_evidence_requests_deletion() {
        let s = strategy();
        let term = ScoredTerm::new(Term::word("spam"), 0.6);
        let now = Utc::now();
        let mut entry = s.create_new(&model(), -1.0, &term, now).unwrap();
        assert!(s.integrate(&mut entry, -1.0, &term, now).unwrap());

        let mut liked = s.create_new(&model(), 1.0, &term, now).unwrap();
        assert!(!s.integrate(&mut liked, 1.0, &term, now).unwrap());
        assert!(s.disintegrate(&mut liked, 1.0, &term, now).unwrap());
    }
}
