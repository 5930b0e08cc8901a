//! Battle event model and DTOs.

use chrono::NaiveDate;
use roster_core::scheduling::{display_label, BattleCategory, EventStatus, Squad};
use roster_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `battle_events` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BattleEvent {
    pub id: DbId,
    #[sqlx(try_from = "String")]
    pub category: BattleCategory,
    #[sqlx(try_from = "String")]
    pub squad: Squad,
    pub scheduled_on: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: EventStatus,
    /// Maintained by the store on every entry insert/delete.
    pub applicant_count: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BattleEvent {
    /// Slot label such as `2026-10-16 20:00 KST`.
    pub fn label(&self) -> String {
        display_label(self.scheduled_on, self.squad)
    }
}

/// DTO for scheduling a new event. Status always starts as `PENDING`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateBattleEvent {
    pub category: BattleCategory,
    pub squad: Squad,
    pub scheduled_on: NaiveDate,
}
