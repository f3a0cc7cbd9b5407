//! # tether-service
//!
//! The facade a desktop client talks to. It owns the active agent manager for
//! one organization, forwards lifecycle events, titles sessions when they
//! stop, and mediates the provider authorization handshake.

#![deny(unsafe_code)]

pub mod errors;
pub mod manager;
pub mod mock;
pub mod orchestrator;
pub mod title;

pub use errors::ServiceError;
pub use manager::{AgentManager, ManagerConfig, ManagerError, ManagerFactory, SessionHost, WatcherStatus};
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator, NOT_STARTED_REASON};
pub use title::{TitleError, TitleOutcome, TitlePolicy};
