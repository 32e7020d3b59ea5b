//! `sitesafe-core` contains the domain vocabulary of the offline engine.
//!
//! Everything in this crate is **pure data** (no IO, no HTTP, no storage):
//! identifiers, entity types, conflict strategies and the durable
//! [`PendingMutation`] record that the rest of the workspace moves around.

pub mod entity;
pub mod error;
pub mod id;
pub mod mutation;
pub mod policy;

pub use entity::EntityType;
pub use error::{DomainError, DomainResult};
pub use id::MutationId;
pub use mutation::{MutationMethod, MutationStatus, PendingMutation, RAW_BODY_KEY};
pub use policy::{ConflictPolicy, ConflictStrategy};
