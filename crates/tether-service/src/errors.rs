use tether_auth::AuthError;

use crate::manager::ManagerError;

/// Errors surfaced to the caller of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("chat service is not started")]
    NotStarted,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}
