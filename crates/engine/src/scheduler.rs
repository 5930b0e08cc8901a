//! Battle event scheduling.
//!
//! Weekday eligibility is checked before any write. Slot uniqueness is left
//! to the store's `(category, squad, scheduled_on)` constraint, whose
//! violation is translated into [`CoreError::DuplicateSlot`].

use std::sync::Arc;

use chrono::NaiveDate;
use roster_core::error::CoreError;
use roster_core::operator::OperatorProfile;
use roster_core::scheduling::{validate_slot_date, BattleCategory, EventStatus, Squad};
use roster_core::types::DbId;
use roster_db::error::UQ_EVENT_SLOT;
use roster_db::models::battle_event::{BattleEvent, CreateBattleEvent};
use roster_db::RecordStore;

const ENTITY: &str = "battle_event";

/// Creates, confirms, and deletes battle events.
#[derive(Clone)]
pub struct EventScheduler {
    store: Arc<dyn RecordStore>,
}

impl EventScheduler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Schedule a `PENDING` event in the given slot.
    pub async fn create(
        &self,
        operator: &OperatorProfile,
        category: BattleCategory,
        squad: Squad,
        date: NaiveDate,
    ) -> Result<BattleEvent, CoreError> {
        operator.ensure_can_manage()?;
        validate_slot_date(squad, date).map_err(CoreError::InvalidDate)?;

        let input = CreateBattleEvent {
            category,
            squad,
            scheduled_on: date,
        };
        match self.store.insert_event(&input).await {
            Ok(event) => {
                tracing::info!(
                    event_id = event.id,
                    category = %category,
                    squad = %squad,
                    date = %date,
                    operator = operator.id,
                    "Event scheduled"
                );
                Ok(event)
            }
            Err(e) if e.is_unique_violation(UQ_EVENT_SLOT) => {
                tracing::info!(category = %category, squad = %squad, date = %date, "Slot already taken");
                Err(CoreError::DuplicateSlot {
                    category: category.to_string(),
                    squad: squad.to_string(),
                    date,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move an event to `CONFIRMED`. Confirming twice is a no-op.
    pub async fn confirm(
        &self,
        operator: &OperatorProfile,
        event_id: DbId,
    ) -> Result<BattleEvent, CoreError> {
        operator.ensure_can_manage()?;

        if let Some(event) = self.store.confirm_event(event_id).await? {
            tracing::info!(event_id, operator = operator.id, "Event confirmed");
            return Ok(event);
        }

        // Either gone or already confirmed.
        let event = self.find(event_id).await?;
        if event.status == EventStatus::Confirmed {
            Ok(event)
        } else {
            Err(CoreError::Internal(format!(
                "Event {event_id} is still {} after confirmation",
                event.status
            )))
        }
    }

    /// Delete an event; its entries go with it.
    pub async fn delete(&self, operator: &OperatorProfile, event_id: DbId) -> Result<(), CoreError> {
        operator.ensure_can_manage()?;
        if !self.store.delete_event(event_id).await? {
            return Err(CoreError::NotFound {
                entity: ENTITY,
                id: event_id,
            });
        }
        tracing::info!(event_id, operator = operator.id, "Event deleted");
        Ok(())
    }

    /// Events of one category, newest date first.
    pub async fn list(&self, category: BattleCategory) -> Result<Vec<BattleEvent>, CoreError> {
        Ok(self.store.list_events(category).await?)
    }

    /// Re-read one event.
    pub async fn refresh(&self, event_id: DbId) -> Result<BattleEvent, CoreError> {
        self.find(event_id).await
    }

    async fn find(&self, event_id: DbId) -> Result<BattleEvent, CoreError> {
        self.store
            .find_event(event_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: ENTITY,
                id: event_id,
            })
    }
}
