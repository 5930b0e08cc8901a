//! Repository for the `battle_events` table.

use roster_core::scheduling::{BattleCategory, EventStatus};
use roster_core::types::DbId;
use sqlx::PgPool;

use crate::models::battle_event::{BattleEvent, CreateBattleEvent};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, category, squad, scheduled_on, status, applicant_count, \
                       created_at, updated_at";

/// Provides CRUD operations for battle events.
pub struct BattleEventRepo;

impl BattleEventRepo {
    /// Insert a new event. A taken slot fails with a `uq_battle_events_slot`
    /// unique violation.
    pub async fn create(
        pool: &PgPool,
        input: &CreateBattleEvent,
    ) -> Result<BattleEvent, sqlx::Error> {
        let query = format!(
            "INSERT INTO battle_events (category, squad, scheduled_on) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BattleEvent>(&query)
            .bind(input.category.as_str())
            .bind(input.squad.as_str())
            .bind(input.scheduled_on)
            .fetch_one(pool)
            .await
    }

    /// Find an event by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<BattleEvent>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM battle_events WHERE id = $1");
        sqlx::query_as::<_, BattleEvent>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Events of one category, most recent date first.
    pub async fn list_by_category(
        pool: &PgPool,
        category: BattleCategory,
    ) -> Result<Vec<BattleEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM battle_events WHERE category = $1 \
             ORDER BY scheduled_on DESC, id DESC"
        );
        sqlx::query_as::<_, BattleEvent>(&query)
            .bind(category.as_str())
            .fetch_all(pool)
            .await
    }

    /// Move a `PENDING` event to `CONFIRMED`.
    ///
    /// Returns `None` if the event is missing or was already confirmed.
    pub async fn confirm(pool: &PgPool, id: DbId) -> Result<Option<BattleEvent>, sqlx::Error> {
        let query = format!(
            "UPDATE battle_events SET status = $2 \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BattleEvent>(&query)
            .bind(id)
            .bind(EventStatus::Confirmed.as_str())
            .bind(EventStatus::Pending.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Delete an event. Its entries are removed by `ON DELETE CASCADE`.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM battle_events WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
