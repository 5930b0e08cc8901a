//! Battle entry (enrollment) models.

use roster_core::scheduling::EntryStatus;
use roster_core::types::{DbId, Timestamp, VersionToken};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `battle_entries` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BattleEntry {
    pub id: DbId,
    pub event_id: DbId,
    pub member_id: DbId,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub version: VersionToken,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An entry joined with the enrolled member, as shown in a participant list.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Participant {
    pub entry_id: DbId,
    pub event_id: DbId,
    pub member_id: DbId,
    pub name: String,
    pub first_squad_power: Option<f64>,
    pub hero_power: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: EntryStatus,
    pub version: VersionToken,
}

impl Participant {
    /// Displayed power: hero power when known, else first squad power.
    pub fn power(&self) -> Option<f64> {
        self.hero_power
            .map(|p| p as f64)
            .or(self.first_squad_power)
    }
}
