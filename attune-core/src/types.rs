//! Core type definitions for the attune pipeline.
//!
//! Identities are small `Copy` newtypes ordered by value so that every
//! collection keyed by them iterates deterministically.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// A user whose interests are modelled.
    UserId
);
numeric_id!(
    /// An inbound message.
    MessageId
);
numeric_id!(
    /// A message group (topic / channel) that scopes similarities.
    MessageGroupId
);
numeric_id!(
    /// Store identity of a user model.
    UserModelId
);

impl MessageGroupId {
    /// Scope of messages that belong to no group.
    pub const UNGROUPED: Self = Self(0);
}

/// Unique identifier of a persisted observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationId(pub Uuid);

impl ObservationId {
    /// Create a new random observation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// The extraction category a term belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermCategory {
    /// A plain (stemmed) word.
    Term,
    /// A noun phrase.
    NounPhrase,
    /// A named entity (person, place, organisation).
    Entity,
    /// A hashtag.
    Hashtag,
    /// A link target.
    Link,
    /// A topic label.
    Topic,
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Term => "term",
            Self::NounPhrase => "noun_phrase",
            Self::Entity => "entity",
            Self::Hashtag => "hashtag",
            Self::Link => "link",
            Self::Topic => "topic",
        };
        f.write_str(name)
    }
}

/// A normalized textual feature. Identity is `(category, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Extraction category.
    pub category: TermCategory,
    /// Normalized text value (trimmed, lower-cased).
    pub value: String,
}

impl Term {
    /// Create a term, normalizing the value.
    pub fn new(category: TermCategory, value: impl AsRef<str>) -> Self {
        Self {
            category,
            value: value.as_ref().trim().to_lowercase(),
        }
    }

    /// Shorthand for a plain [`TermCategory::Term`].
    pub fn word(value: impl AsRef<str>) -> Self {
        Self::new(TermCategory::Term, value)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.value)
    }
}

/// A term paired with a mutable weight.
///
/// The weight is roughly in [0, 1] but stays unbounded during intermediate
/// math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTerm {
    /// The term identity.
    pub term: Term,
    /// Current weight.
    pub weight: f64,
}

impl ScoredTerm {
    /// Pair a term with a weight.
    #[must_use]
    pub fn new(term: Term, weight: f64) -> Self {
        Self { term, weight }
    }
}

// ---------------------------------------------------------------------------
// Interest & Observations
// ---------------------------------------------------------------------------

/// Discretized strength of a user's reaction to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interest {
    /// Explicitly uninterested.
    None,
    /// Weakly uninterested.
    Low,
    /// Mildly interested.
    Normal,
    /// Interested.
    High,
    /// Maximum interest.
    Extreme,
}

impl Interest {
    /// All levels, lowest first.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Low,
        Self::Normal,
        Self::High,
        Self::Extreme,
    ];

    /// Numeric score in [-1, 1].
    #[must_use]
    pub fn score(self) -> f64 {
        match self {
            Self::None => -1.0,
            Self::Low => -0.5,
            Self::Normal => 0.5,
            Self::High => 0.75,
            Self::Extreme => 1.0,
        }
    }

    /// The level whose score is closest to `score`.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        Self::ALL
            .into_iter()
            .min_by_key(|level| OrderedFloat((level.score() - score).abs()))
            .unwrap_or(Self::Normal)
    }
}

/// Whether an observation is explicit feedback or inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    /// Explicit user rating.
    Rating,
    /// Interest inferred from the user's own message activity.
    Message,
}

/// A timestamped interest signal tying a user to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Identity.
    pub id: ObservationId,
    /// Who reacted.
    pub user_id: UserId,
    /// What they reacted to.
    pub message_id: MessageId,
    /// Explicit or inferred.
    pub observation_type: ObservationType,
    /// Ordering hint when several observations describe the same pair.
    pub priority: i32,
    /// An earlier observation this one supersedes.
    pub related_observation_id: Option<ObservationId>,
    /// When the reaction happened.
    pub date: DateTime<Utc>,
    /// Discretized interest.
    pub interest: Interest,
}

impl Observation {
    /// Create a new observation with a fresh ID and default priority.
    #[must_use]
    pub fn new(
        user_id: UserId,
        message_id: MessageId,
        observation_type: ObservationType,
        interest: Interest,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObservationId::new(),
            user_id,
            message_id,
            observation_type,
            priority: 0,
            related_observation_id: None,
            date,
            interest,
        }
    }

    /// Mark this observation as superseding `related`.
    #[must_use]
    pub fn superseding(mut self, related: ObservationId) -> Self {
        self.related_observation_id = Some(related);
        self
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// An inbound message with its extracted content terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identity.
    pub id: MessageId,
    /// Topic / channel the message belongs to.
    pub group_id: Option<MessageGroupId>,
    /// Who wrote it, if known.
    pub author: Option<UserId>,
    /// The message this one replies to; `None` for a discussion root.
    pub parent_id: Option<MessageId>,
    /// Root of the discussion this message belongs to.
    pub root_id: Option<MessageId>,
    /// Publication date.
    pub published: DateTime<Utc>,
    /// Extracted, weighted content terms.
    pub terms: Vec<ScoredTerm>,
}

impl Message {
    /// A root message without author or group.
    #[must_use]
    pub fn new(id: MessageId, published: DateTime<Utc>, terms: Vec<ScoredTerm>) -> Self {
        Self {
            id,
            group_id: None,
            author: None,
            parent_id: None,
            root_id: None,
            published,
            terms,
        }
    }

    /// Set the message group.
    #[must_use]
    pub fn in_group(mut self, group: MessageGroupId) -> Self {
        self.group_id = Some(group);
        self
    }

    /// Set the author.
    #[must_use]
    pub fn authored_by(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    /// Make this message a reply to `parent` within the discussion `root`.
    #[must_use]
    pub fn reply_to(mut self, parent: MessageId, root: MessageId) -> Self {
        self.parent_id = Some(parent);
        self.root_id = Some(root);
        self
    }

    /// Whether this message starts a discussion.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The message's group, or [`MessageGroupId::UNGROUPED`].
    #[must_use]
    pub fn group_or_ungrouped(&self) -> MessageGroupId {
        self.group_id.unwrap_or(MessageGroupId::UNGROUPED)
    }

    /// The discussion this message belongs to (itself when it is a root).
    #[must_use]
    pub fn discussion_id(&self) -> MessageId {
        self.root_id.unwrap_or(self.id)
    }

    /// Terms of this message, in extraction order.
    pub fn term_keys(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter().map(|st| &st.term)
    }
}

/// How a user relates to the message that triggered learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The user wrote the message.
    Author,
    /// The user replied to the message.
    Reply,
    /// The user was mentioned in the message.
    Mention,
    /// The user shared the message.
    Share,
}

/// Relation between the learning user and the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRelation {
    /// Relation kind.
    pub kind: RelationKind,
    /// The related message (e.g. the reply), if any.
    pub related_message: Option<MessageId>,
}

/// Unit of work for the learner chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningMessage {
    /// The message the user reacted to.
    pub message: Message,
    /// Optional relation of the user to the message.
    pub relation: Option<MessageRelation>,
    /// Who reacted.
    pub user_id: UserId,
    /// How strongly.
    pub interest: Interest,
    /// Explicit or inferred.
    pub observation_type: ObservationType,
    /// When the reaction happened.
    pub date: DateTime<Utc>,
    /// An earlier observation this reaction replaces.
    #[serde(default)]
    pub related_observation_id: Option<ObservationId>,
}

impl LearningMessage {
    /// An explicit rating of `message` by `user_id`.
    #[must_use]
    pub fn rating(message: Message, user_id: UserId, interest: Interest, date: DateTime<Utc>) -> Self {
        Self {
            message,
            relation: None,
            user_id,
            interest,
            observation_type: ObservationType::Rating,
            date,
            related_observation_id: None,
        }
    }

    /// An inferred interest of `user_id` in `message`.
    #[must_use]
    pub fn inferred(message: Message, user_id: UserId, interest: Interest, date: DateTime<Utc>) -> Self {
        Self {
            observation_type: ObservationType::Message,
            ..Self::rating(message, user_id, interest, date)
        }
    }

    /// Replace the interest recorded by `related` instead of adding to it.
    #[must_use]
    pub fn superseding(mut self, related: ObservationId) -> Self {
        self.related_observation_id = Some(related);
        self
    }

    /// Attach how the user relates to the message.
    #[must_use]
    pub fn with_relation(mut self, kind: RelationKind, related_message: Option<MessageId>) -> Self {
        self.relation = Some(MessageRelation {
            kind,
            related_message,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Similarities
// ---------------------------------------------------------------------------

/// Directional, topic-scoped similarity between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSimilarity {
    /// Source user.
    pub user_from: UserId,
    /// Target user.
    pub user_to: UserId,
    /// Topic scope.
    pub group_id: MessageGroupId,
    /// Similarity in [0, 1].
    pub similarity: f64,
    /// When it was computed (staleness checks).
    pub computed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Milliseconds from `from` to `to`; negative when `to` precedes `from`.
#[must_use]
pub fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_identity_is_normalized() {
        let a = Term::word("  Rust ");
        let b = Term::word("rust");
        assert_eq!(a, b);
        assert_ne!(a, Term::new(TermCategory::Hashtag, "rust"));
    }

    #[test]
    fn interest_scores_are_ordered_and_bounded() {
        let scores: Vec<f64> = Interest::ALL.iter().map(|i| i.score()).collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]));
        assert!(scores.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn interest_from_score_picks_nearest() {
        assert_eq!(Interest::from_score(0.9), Interest::Extreme);
        assert_eq!(Interest::from_score(-0.6), Interest::Low);
        assert_eq!(Interest::from_score(0.55), Interest::Normal);
    }

    #[test]
    fn reply_belongs_to_root_discussion() {
        let now = Utc::now();
        let root = Message::new(MessageId(1), now, vec![]);
        let reply = Message::new(MessageId(2), now, vec![]).reply_to(MessageId(1), MessageId(1));
        assert!(root.is_root());
        assert!(!reply.is_root());
        assert_eq!(reply.discussion_id(), root.discussion_id());
    }
}
