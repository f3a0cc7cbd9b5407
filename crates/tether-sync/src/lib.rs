//! Durable delivery of session-derived state to remote stores.
//!
//! - [`backoff`]: bounded, cancellable retry of a single idempotent write
//! - [`commands`]: command-status updates delivered through the retry policy
//! - [`cache`]: observable keyed cache with consistent snapshots
//! - [`presence`]: presence and agent rows for one session, plus the write path

pub mod backoff;
pub mod cache;
pub mod commands;
pub mod errors;
pub mod presence;

pub use backoff::{BackoffMutator, DeliveryOutcome, DELIVERY_DELAYS};
pub use cache::{CacheChange, ObservableCache, Subscription};
pub use commands::{CommandPersister, CommandSink, HttpCommandSink};
pub use errors::SyncError;
pub use presence::{PresenceConfig, PresenceSync, SyncMessage};
