use chrono::NaiveDate;

use crate::types::{DbId, Timestamp};

/// A stored text tag that does not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Duplicate slot: a {category} event for squad {squad} on {date} already exists")]
    DuplicateSlot {
        category: String,
        squad: String,
        date: NaiveDate,
    },

    #[error("Duplicate entry: member {member_id} is already enrolled in event {event_id}")]
    DuplicateEntry { event_id: DbId, member_id: DbId },

    #[error("Lock conflict: {entity} {id} is locked by {holder} until {expires_at}")]
    LockConflict {
        entity: &'static str,
        id: DbId,
        holder: DbId,
        expires_at: Timestamp,
    },

    #[error("Lease not held: {entity} {id} is not leased by {holder}")]
    LeaseNotHeld {
        entity: &'static str,
        id: DbId,
        holder: DbId,
    },

    #[error("Version conflict: {entity} {id} was modified by another operator")]
    VersionConflict { entity: &'static str, id: DbId },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ParseEnumError> for CoreError {
    fn from(err: ParseEnumError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

impl CoreError {
    /// `true` for outcomes where a precondition failed and the caller should
    /// reload before trying again.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::LockConflict { .. }
                | CoreError::LeaseNotHeld { .. }
                | CoreError::VersionConflict { .. }
        )
    }

    /// Only transport failures are candidates for a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }

    /// `true` for uniqueness hits, which are informative rather than faults.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateSlot { .. } | CoreError::DuplicateEntry { .. }
        )
    }
}
