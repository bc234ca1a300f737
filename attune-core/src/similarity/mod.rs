//! Similarity computers.
//!
//! - [`term_vector`]: message terms against a user's entries (content match).
//! - [`user`]: directional user-to-user similarity for adaptation.
//! - [`group`]: message-group term overlap for collaborative merging.
//! - [`cache`]: the read-through TTL cache shared by the above.

pub mod cache;
pub mod group;
pub mod term_vector;
pub mod user;

pub use cache::TtlCache;
pub use group::{GroupSimilarityComputer, MessageGroupSimilarity};
pub use term_vector::{
    TermImportance, TermImportanceKind, TermVectorKind, TermVectorSimilarity,
};
pub use user::{
    InteractionUserSimilarity, StoredInterestSelector, TermUserSimilarity, UserSimilarityComputer,
};
