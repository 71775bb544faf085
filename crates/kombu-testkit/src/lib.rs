//! Test utilities for the kombu workspace.
//!
//! Deterministic mock embedding providers (fixtures, hashed pseudo
//! embeddings, failure injection) and corpus generators. Dev-dependency
//! only; nothing here ships in a release build.

mod corpus;
mod providers;

pub use corpus::{random_corpus, tagged_corpus};
pub use providers::{FixtureProvider, FlakyProvider, HashProvider};
