//! Repository for the `members` table, including the lease columns.

use roster_core::roster::page_range;
use roster_core::types::{DbId, Timestamp, VersionToken};
use sqlx::PgPool;

use crate::models::member::{CreateMember, Member, UpdateMember};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, first_squad_power, hero_power, version, \
                       lock_holder, lock_expires_at, created_at, updated_at";

/// Lease-takeover predicate: unlocked, expired, or already ours.
/// `$2` is the holder, `$3` the caller's `now`.
const LEASE_AVAILABLE: &str = "(lock_holder IS NULL \
                                OR lock_expires_at IS NULL \
                                OR lock_expires_at <= $3 \
                                OR lock_holder = $2)";

/// Provides CRUD and lease operations for members.
pub struct MemberRepo;

impl MemberRepo {
    /// Insert a new member, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateMember) -> Result<Member, sqlx::Error> {
        let query = format!(
            "INSERT INTO members (name, first_squad_power, hero_power) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Member>(&query)
            .bind(&input.name)
            .bind(input.first_squad_power)
            .bind(input.hero_power)
            .fetch_one(pool)
            .await
    }

    /// Find a member by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Member>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM members WHERE id = $1");
        sqlx::query_as::<_, Member>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// One roster page ordered by id, plus the exact total count.
    pub async fn list_page(pool: &PgPool, page: i64) -> Result<(Vec<Member>, i64), sqlx::Error> {
        let (from, to) = page_range(page);
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members")
            .fetch_one(pool)
            .await?;

        let query = format!(
            "SELECT {COLUMNS} FROM members ORDER BY id ASC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, Member>(&query)
            .bind(to - from + 1)
            .bind(from)
            .fetch_all(pool)
            .await?;
        Ok((rows, total))
    }

    /// All members ordered by name.
    pub async fn list_by_name(pool: &PgPool) -> Result<Vec<Member>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM members ORDER BY name ASC, id ASC");
        sqlx::query_as::<_, Member>(&query).fetch_all(pool).await
    }

    /// Take or refresh the lease in a single conditional write.
    ///
    /// Returns the updated row, or `None` if another holder has a live lease
    /// (or the row does not exist).
    pub async fn try_lock(
        pool: &PgPool,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, sqlx::Error> {
        let query = format!(
            "UPDATE members SET lock_holder = $2, lock_expires_at = $4 \
             WHERE id = $1 AND {LEASE_AVAILABLE} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Member>(&query)
            .bind(id)
            .bind(holder)
            .bind(now)
            .bind(until)
            .fetch_optional(pool)
            .await
    }

    /// Push a live lease's expiry forward. Only the current holder can extend.
    pub async fn extend_lock(
        pool: &PgPool,
        id: DbId,
        holder: DbId,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Option<Member>, sqlx::Error> {
        let query = format!(
            "UPDATE members SET lock_expires_at = $4 \
             WHERE id = $1 AND lock_holder = $2 AND lock_expires_at > $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Member>(&query)
            .bind(id)
            .bind(holder)
            .bind(now)
            .bind(until)
            .fetch_optional(pool)
            .await
    }

    /// Clear the lease if `holder` owns it. Returns `true` if cleared.
    pub async fn unlock(pool: &PgPool, id: DbId, holder: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE members SET lock_holder = NULL, lock_expires_at = NULL \
             WHERE id = $1 AND lock_holder = $2",
        )
        .bind(id)
        .bind(holder)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap edit.
    ///
    /// Applies only if `version` still equals `expected` and, when `holder`
    /// is given, the caller holds the lease. The same statement clears the
    /// lease, so a successful edit also releases it.
    pub async fn update_guarded(
        pool: &PgPool,
        id: DbId,
        input: &UpdateMember,
        holder: Option<DbId>,
        expected: VersionToken,
    ) -> Result<Option<Member>, sqlx::Error> {
        let query = format!(
            "UPDATE members SET \
                name = $2, \
                first_squad_power = $3, \
                hero_power = $4, \
                lock_holder = CASE WHEN $6::BIGINT IS NULL THEN lock_holder ELSE NULL END, \
                lock_expires_at = CASE WHEN $6::BIGINT IS NULL THEN lock_expires_at ELSE NULL END \
             WHERE id = $1 AND version = $5 \
               AND ($6::BIGINT IS NULL OR lock_holder = $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Member>(&query)
            .bind(id)
            .bind(&input.name)
            .bind(input.first_squad_power)
            .bind(input.hero_power)
            .bind(expected)
            .bind(holder)
            .fetch_optional(pool)
            .await
    }

    /// Overwrite the first squad power. Bumps the version like any write.
    pub async fn set_power(
        pool: &PgPool,
        id: DbId,
        power: f64,
    ) -> Result<Option<Member>, sqlx::Error> {
        let query = format!(
            "UPDATE members SET first_squad_power = $2 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Member>(&query)
            .bind(id)
            .bind(power)
            .fetch_optional(pool)
            .await
    }

    /// Delete a member unless someone else holds a live lease.
    ///
    /// Returns `true` if the row was deleted. Entries cascade.
    pub async fn delete_unlocked(
        pool: &PgPool,
        id: DbId,
        holder: DbId,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let query = format!("DELETE FROM members WHERE id = $1 AND {LEASE_AVAILABLE}");
        let result = sqlx::query(&query)
            .bind(id)
            .bind(holder)
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
