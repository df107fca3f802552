use sesh_core::{SessionId, TickUuid, UserId};
use sesh_store::StoreError;

/// Failures of session operations.
///
/// Everything except [`SessionError::Store`] is a validation outcome and is
/// terminal for the calling operation. Of the store failures only database
/// and IO errors are transient.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication required")]
    NotAuthenticated,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user {user_id} is not a participant of session {session_id}")]
    NotParticipant { session_id: SessionId, user_id: UserId },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("tick not found: {0}")]
    TickNotFound(TickUuid),

    #[error("no ticks for user {user_id} in the time range of session {session_id}")]
    NoOverlappingEvents { session_id: SessionId, user_id: UserId },

    #[error("cannot remove the owner of session {0}")]
    CannotRemoveOwner(SessionId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Only transient store failures are worth retrying, and only at batch
    /// granularity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_) | StoreError::Io(_)))
    }

    /// Short classification string for logging and caller-facing messages.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotParticipant { .. } => "not_participant",
            Self::SessionNotFound(_) => "session_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::TickNotFound(_) => "tick_not_found",
            Self::NoOverlappingEvents { .. } => "no_overlapping_events",
            Self::CannotRemoveOwner(_) => "cannot_remove_owner",
            Self::Store(StoreError::Database(_) | StoreError::Io(_)) => "transient_store_error",
            Self::Store(_) => "store_error",
        }
    }
}

/// The acting user of a mutation, or `None` when unauthenticated.
pub(crate) fn require_actor(actor: Option<&UserId>) -> Result<&UserId, SessionError> {
    match actor {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(SessionError::NotAuthenticated),
    }
}

pub(crate) fn require_id<'a, T: AsRef<str>>(
    value: &'a T,
    field: &str,
) -> Result<&'a T, SessionError> {
    if value.as_ref().trim().is_empty() {
        return Err(SessionError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value)
}
