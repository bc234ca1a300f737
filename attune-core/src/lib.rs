//! # Attune Core Library
//!
//! Personalization core for a stream of inbound messages. Every message is
//! scored per user from a weighted combination of signals, and every
//! observed reaction (explicit rating or inferred interest) incrementally
//! updates a per-user, per-term interest model that later scoring consults.
//!
//! - **User models**: one weight per (user, term), learned by a pluggable
//!   [`integration::IntegrationStrategy`] (plain mean, incremental alpha,
//!   time-binned with decay).
//! - **Scoring**: the [`chain::ScorerChain`] computes content,
//!   collaborative, participation and recency features and aggregates them
//!   linearly.
//! - **Learning**: the [`chain::LearnerChain`] integrates observations,
//!   replacing earlier ratings of the same message.
//! - **Collaborative filtering**: user-message, user-term, per-group and
//!   combining computers produce batch predictions.
//! - **Adaptation**: sparse models borrow term weights from similar users.
//!
//! Persistence is abstracted behind [`store::Store`];
//! [`store::InMemoryStore`] implements it in process memory.
//!
//! ## Concurrency Contract
//!
//! Units of work (one message, one user) are independent. Entry mutation
//! is not self-synchronizing: learning for the same user must be
//! serialized by the caller, e.g. through [`chain::UserLocks`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adaptation;
pub mod aggregation;
pub mod chain;
pub mod cleanup;
pub mod collaborative;
pub mod config;
pub mod decay;
pub mod error;
pub mod integration;
pub mod metrics;
pub mod model;
pub mod similarity;
pub mod store;
pub mod types;

pub use config::AttuneConfig;
pub use error::{AttuneError, Result};
pub use model::{ModelType, UserModel, UserModelEntry};
pub use store::{InMemoryStore, Store};
pub use types::*;
