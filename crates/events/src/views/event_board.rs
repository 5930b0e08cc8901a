//! Category-filtered event list plus the currently opened event.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use roster_core::error::CoreError;
use roster_core::scheduling::BattleCategory;
use roster_core::types::DbId;
use roster_db::models::battle_event::BattleEvent;
use roster_db::{ChangeOp, RecordStore, RowChange, RowFilter, Table};

use crate::bus::{NoticeBus, ViewKind, ViewNotice};
use crate::cache::EntityCache;
use crate::dispatcher::{Reconciler, ResyncReason};

const VIEW: ViewKind = ViewKind::EventBoard;

/// Events of one category, newest date first.
///
/// Remote inserts are prepended, updates merged in place, deletes purged.
/// Deleting the selected event clears the selection and raises
/// [`ViewNotice::SelectedEventDeleted`].
pub struct EventBoard {
    store: Arc<dyn RecordStore>,
    notices: Arc<NoticeBus>,
    category: BattleCategory,
    cache: EntityCache<BattleEvent>,
    selected: Mutex<Option<DbId>>,
}

impl EventBoard {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notices: Arc<NoticeBus>,
        category: BattleCategory,
    ) -> Self {
        Self {
            store,
            notices,
            category,
            cache: EntityCache::new(),
            selected: Mutex::new(None),
        }
    }

    pub fn category(&self) -> BattleCategory {
        self.category
    }

    pub fn events(&self) -> Vec<BattleEvent> {
        self.cache.snapshot()
    }

    pub fn get(&self, id: DbId) -> Option<BattleEvent> {
        self.cache.get(id)
    }

    pub fn selected(&self) -> Option<DbId> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn select(&self, event_id: Option<DbId>) {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = event_id;
    }

    /// Fold a row the session itself wrote or re-read into the cache.
    pub fn merge_local(&self, event: BattleEvent) {
        if event.category != self.category {
            return;
        }
        let id = event.id;
        if self.cache.merge(event.clone()) {
            self.notices.publish(ViewNotice::Merged { view: VIEW, id });
        } else {
            self.cache.prepend(event);
            self.notices.publish(ViewNotice::Prepended { view: VIEW, id });
        }
    }

    /// Purge a row the session itself deleted.
    pub fn purge_local(&self, event_id: DbId) {
        self.purge(event_id);
    }

    fn purge(&self, event_id: DbId) {
        if self.cache.remove(event_id).is_some() {
            self.notices.publish(ViewNotice::Purged {
                view: VIEW,
                id: event_id,
            });
        }
        self.clear_selection_if(event_id);
    }

    fn clear_selection_if(&self, event_id: DbId) {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        if *selected == Some(event_id) {
            *selected = None;
            drop(selected);
            tracing::info!(event_id, "Selected event deleted by another operator");
            self.notices
                .publish(ViewNotice::SelectedEventDeleted { event_id });
        }
    }

    fn decode(change: &RowChange) -> Result<BattleEvent, CoreError> {
        change
            .decode_new()
            .map_err(|e| CoreError::Internal(format!("Bad event payload: {e}")))?
            .ok_or_else(|| CoreError::Internal("Change without new row".into()))
    }
}

#[async_trait]
impl Reconciler for EventBoard {
    fn name(&self) -> &'static str {
        "event_board"
    }

    fn table(&self) -> Table {
        Table::BattleEvents
    }

    fn filter(&self) -> Option<RowFilter> {
        Some(RowFilter::eq("category", self.category.as_str()))
    }

    async fn apply(&self, change: RowChange) -> Result<(), CoreError> {
        match change.op {
            ChangeOp::Inserted => {
                let event = Self::decode(&change)?;
                if event.category == self.category {
                    let id = event.id;
                    self.cache.prepend(event);
                    self.notices.publish(ViewNotice::Prepended { view: VIEW, id });
                }
            }
            ChangeOp::Updated => {
                let event = Self::decode(&change)?;
                let id = event.id;
                if event.category != self.category {
                    self.purge(id);
                } else if self.cache.merge(event) {
                    tracing::debug!(event_id = id, "Merged event");
                    self.notices.publish(ViewNotice::Merged { view: VIEW, id });
                }
            }
            ChangeOp::Deleted => {
                if let Some(id) = change.row_id() {
                    self.purge(id);
                }
            }
        }
        Ok(())
    }

    async fn resync(&self, reason: ResyncReason) -> Result<(), CoreError> {
        let events = self.store.list_events(self.category).await?;
        self.cache.replace_all(events);
        if let Some(selected) = self.selected() {
            if !self.cache.contains(selected) {
                self.clear_selection_if(selected);
            }
        }
        self.notices.publish(ViewNotice::Resynced { view: VIEW, reason });
        Ok(())
    }
}
