/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque row version, replaced by the store on every write.
///
/// Only ever compared for equality; two tokens carry no ordering.
pub type VersionToken = uuid::Uuid;
