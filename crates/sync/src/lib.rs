//! `sitesafe-sync` replays the offline mutation queue against the API.
//!
//! The pieces: [`OfflineMutationQueue`] captures writes that could not reach
//! the network, [`ConflictDetector`] probes the server copy before replaying
//! an update, [`resolver`] applies the entity's conflict strategy, and
//! [`SyncOrchestrator`] drives one replay pass end to end, broadcasting
//! [`SyncEvent`]s as it goes.

pub mod detector;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod scheduler;

pub use detector::{ConflictCheck, ConflictDetector};
pub use error::SyncError;
pub use events::{SyncEvent, SyncNotifier};
pub use orchestrator::{SyncOrchestrator, SyncResult, DEFAULT_RETRY_CEILING};
pub use queue::OfflineMutationQueue;
pub use resolver::{merge_values, resolve, Resolution};
pub use scheduler::{NoopScheduler, NotifyScheduler, SyncScheduler};

/// Marker header stamped on every replayed mutation.
pub const REPLAY_HEADER: &str = "x-sitesafe-offline-replay";

/// Millisecond enqueue timestamp stamped on every replayed mutation.
pub const REPLAYED_AT_HEADER: &str = "x-sitesafe-replayed-at";

/// Marker header stamped on conflict probe reads.
pub const PROBE_HEADER: &str = "x-sitesafe-conflict-probe";
