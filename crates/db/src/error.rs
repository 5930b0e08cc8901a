//! Store failure classification.

use roster_core::error::CoreError;

/// Unique slot constraint on `battle_events (category, squad, scheduled_on)`.
pub const UQ_EVENT_SLOT: &str = "uq_battle_events_slot";

/// Unique enrollment constraint on `battle_entries (event_id, member_id)`.
pub const UQ_ENTRY_MEMBER: &str = "uq_battle_entries_event_member";

/// Foreign key from `battle_entries.event_id` to `battle_events`.
pub const FK_ENTRY_EVENT: &str = "fk_battle_entries_event";

/// Foreign key from `battle_entries.member_id` to `members`.
pub const FK_ENTRY_MEMBER: &str = "fk_battle_entries_member";

/// Failure reported by a [`RecordStore`](crate::RecordStore) or
/// [`ChangeFeed`](crate::ChangeFeed).
///
/// Constraint violations are split out so callers can turn them into
/// user-facing outcomes instead of faults. A conditional write whose
/// precondition fails is *not* an error; it shows up as zero affected rows.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// `true` if this is a uniqueness violation on the named constraint.
    pub fn is_unique_violation(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }

    /// `true` if this is a foreign key violation on the named constraint.
    pub fn is_foreign_key_violation(&self, name: &str) -> bool {
        matches!(self, StoreError::ForeignKeyViolation { constraint } if constraint == name)
    }
}

impl From<sqlx::Error> for StoreError {
    /// Classify a sqlx error.
    ///
    /// - SQLSTATE `23505` maps to [`StoreError::UniqueViolation`].
    /// - SQLSTATE `23503` maps to [`StoreError::ForeignKeyViolation`].
    /// - Pool and I/O failures map to [`StoreError::Unavailable`].
    /// - Everything else is kept as [`StoreError::Database`].
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some("23505") => StoreError::UniqueViolation { constraint },
                    Some("23503") => StoreError::ForeignKeyViolation { constraint },
                    _ => StoreError::Database(err),
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

impl From<StoreError> for CoreError {
    /// Default mapping for store failures nobody translated more precisely.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } => {
                CoreError::Validation(format!("Duplicate value violates unique constraint: {constraint}"))
            }
            StoreError::ForeignKeyViolation { constraint } => {
                CoreError::Validation(format!("Referenced row does not exist: {constraint}"))
            }
            StoreError::Unavailable(msg) => CoreError::Transport(msg),
            StoreError::Database(e) => CoreError::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unique_violation_is_matched_by_name() {
        let err = StoreError::UniqueViolation {
            constraint: UQ_EVENT_SLOT.to_string(),
        };
        assert!(err.is_unique_violation(UQ_EVENT_SLOT));
        assert!(!err.is_unique_violation(UQ_ENTRY_MEMBER));
        assert!(!err.is_foreign_key_violation(UQ_EVENT_SLOT));
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert_matches!(err, StoreError::Unavailable(_));
    }

    #[test]
    fn row_not_found_stays_database_error() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert_matches!(err, StoreError::Database(sqlx::Error::RowNotFound));
    }

    #[test]
    fn unavailable_maps_to_retryable_transport() {
        let core: CoreError = StoreError::Unavailable("down".into()).into();
        assert!(core.is_retryable());
    }

    #[test]
    fn untranslated_unique_violation_is_validation() {
        let core: CoreError = StoreError::UniqueViolation {
            constraint: "uq_other".into(),
        }
        .into();
        assert_matches!(core, CoreError::Validation(msg) if msg.contains("uq_other"));
    }
}
