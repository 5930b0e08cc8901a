//! Row-level mutation events and the feed that delivers them.
//!
//! Every insert/update/delete on a roster table produces one [`RowChange`]
//! carrying the old and/or new row as JSON. A [`ChangeFeed`] hands out one
//! bounded broadcast receiver per table: delivery is ordered within that
//! receiver only, and overflow surfaces as `RecvError::Lagged` so the
//! consumer can drop what it has and resynchronize.

use async_trait::async_trait;
use roster_core::types::DbId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Tables that publish change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Members,
    BattleEvents,
    BattleEntries,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Members, Table::BattleEvents, Table::BattleEntries];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Members => "members",
            Table::BattleEvents => "battle_events",
            Table::BattleEntries => "battle_entries",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation, spelled the way the database trigger reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "INSERT")]
    Inserted,
    #[serde(rename = "UPDATE")]
    Updated,
    #[serde(rename = "DELETE")]
    Deleted,
}

/// One row mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub op: ChangeOp,
    /// Row before the change (updates and deletes).
    pub old: Option<serde_json::Value>,
    /// Row after the change (inserts and updates).
    pub new: Option<serde_json::Value>,
}

impl RowChange {
    pub fn inserted<T: Serialize>(table: Table, row: &T) -> Self {
        Self {
            table,
            op: ChangeOp::Inserted,
            old: None,
            new: serde_json::to_value(row).ok(),
        }
    }

    pub fn updated<T: Serialize>(table: Table, old: &T, new: &T) -> Self {
        Self {
            table,
            op: ChangeOp::Updated,
            old: serde_json::to_value(old).ok(),
            new: serde_json::to_value(new).ok(),
        }
    }

    pub fn deleted<T: Serialize>(table: Table, row: &T) -> Self {
        Self {
            table,
            op: ChangeOp::Deleted,
            old: serde_json::to_value(row).ok(),
            new: None,
        }
    }

    /// The row a filter should look at: `new` when present, else `old`.
    pub fn row(&self) -> Option<&serde_json::Value> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// The `id` column of the affected row.
    pub fn row_id(&self) -> Option<DbId> {
        self.row()?.get("id")?.as_i64()
    }

    /// Decode the `new` row into a typed model.
    pub fn decode_new<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.new
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }
}

/// Column-equals-value predicate applied to the affected row,
/// e.g. `event_id = 42` or `category = "DESERT"`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub column: String,
    pub value: serde_json::Value,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `true` if the affected row has `column == value`.
    ///
    /// Updates match if either side of the change matches, so a row moving
    /// out of the filtered set is still seen once.
    pub fn matches(&self, change: &RowChange) -> bool {
        let hit = |row: &Option<serde_json::Value>| {
            row.as_ref()
                .and_then(|r| r.get(&self.column))
                .is_some_and(|v| *v == self.value)
        };
        hit(&change.new) || hit(&change.old)
    }
}

/// What a feed receiver yields.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(RowChange),
    /// Continuity was lost upstream (e.g. the listener reconnected); the
    /// consumer must reload instead of assuming it saw every change.
    Gap,
}

/// Source of per-table change streams.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a new receiver for `table`. Each call is an independent channel.
    async fn listen(&self, table: Table) -> Result<broadcast::Receiver<FeedMessage>, StoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_trigger_payload() {
        let raw = r#"{"table":"battle_events","op":"DELETE","old":{"id":9,"category":"DESERT"},"new":null}"#;
        let change: RowChange = serde_json::from_str(raw).unwrap();
        assert_eq!(change.table, Table::BattleEvents);
        assert_eq!(change.op, ChangeOp::Deleted);
        assert_eq!(change.row_id(), Some(9));
    }

    #[test]
    fn filter_matches_new_or_old_row() {
        let filter = RowFilter::eq("event_id", 4);
        let inserted = RowChange {
            table: Table::BattleEntries,
            op: ChangeOp::Inserted,
            old: None,
            new: Some(json!({"id": 1, "event_id": 4})),
        };
        let deleted = RowChange {
            table: Table::BattleEntries,
            op: ChangeOp::Deleted,
            old: Some(json!({"id": 2, "event_id": 4})),
            new: None,
        };
        let other = RowChange {
            table: Table::BattleEntries,
            op: ChangeOp::Inserted,
            old: None,
            new: Some(json!({"id": 3, "event_id": 5})),
        };
        assert!(filter.matches(&inserted));
        assert!(filter.matches(&deleted));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn filter_on_missing_column_never_matches() {
        let filter = RowFilter::eq("category", "DESERT");
        let change = RowChange {
            table: Table::Members,
            op: ChangeOp::Updated,
            old: Some(json!({"id": 1})),
            new: Some(json!({"id": 1})),
        };
        assert!(!filter.matches(&change));
    }
}
