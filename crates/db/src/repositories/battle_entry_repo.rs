//! Repository for the `battle_entries` table.

use roster_core::scheduling::EntryStatus;
use roster_core::types::{DbId, VersionToken};
use sqlx::PgPool;

use crate::models::battle_entry::{BattleEntry, Participant};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, event_id, member_id, status, version, created_at, updated_at";

/// Provides enrollment operations for battle entries.
pub struct BattleEntryRepo;

impl BattleEntryRepo {
    /// Insert one `PENDING` entry per member, skipping pairs that already
    /// exist. Returns only the rows actually inserted.
    pub async fn create_many_skip_existing(
        pool: &PgPool,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<Vec<BattleEntry>, sqlx::Error> {
        let query = format!(
            "INSERT INTO battle_entries (event_id, member_id, status) \
             SELECT $1, m, $3 FROM UNNEST($2::BIGINT[]) AS m \
             ON CONFLICT (event_id, member_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BattleEntry>(&query)
            .bind(event_id)
            .bind(member_ids)
            .bind(EntryStatus::Pending.as_str())
            .fetch_all(pool)
            .await
    }

    /// Insert a single `PENDING` entry. A duplicate fails with a
    /// `uq_battle_entries_event_member` unique violation.
    pub async fn create(
        pool: &PgPool,
        event_id: DbId,
        member_id: DbId,
    ) -> Result<BattleEntry, sqlx::Error> {
        let query = format!(
            "INSERT INTO battle_entries (event_id, member_id, status) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BattleEntry>(&query)
            .bind(event_id)
            .bind(member_id)
            .bind(EntryStatus::Pending.as_str())
            .fetch_one(pool)
            .await
    }

    /// Find an entry by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<BattleEntry>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM battle_entries WHERE id = $1");
        sqlx::query_as::<_, BattleEntry>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Entries of one event joined with their members, in enrollment order.
    pub async fn list_participants(
        pool: &PgPool,
        event_id: DbId,
    ) -> Result<Vec<Participant>, sqlx::Error> {
        sqlx::query_as::<_, Participant>(
            "SELECT e.id AS entry_id, e.event_id, e.member_id, m.name, \
                    m.first_squad_power, m.hero_power, e.status, e.version \
             FROM battle_entries e \
             JOIN members m ON m.id = e.member_id \
             WHERE e.event_id = $1 \
             ORDER BY e.id ASC",
        )
        .bind(event_id)
        .fetch_all(pool)
        .await
    }

    /// Version-guarded status change.
    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<Option<BattleEntry>, sqlx::Error> {
        let query = format!(
            "UPDATE battle_entries SET status = $3 \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BattleEntry>(&query)
            .bind(id)
            .bind(expected)
            .bind(status.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Version-guarded delete. Returns `true` if the entry was removed.
    pub async fn delete_guarded(
        pool: &PgPool,
        event_id: DbId,
        id: DbId,
        expected: VersionToken,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM battle_entries WHERE id = $1 AND event_id = $2 AND version = $3",
        )
        .bind(id)
        .bind(event_id)
        .bind(expected)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of entries still referencing an event.
    pub async fn count_for_event(pool: &PgPool, event_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM battle_entries WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(pool)
            .await
    }
}
