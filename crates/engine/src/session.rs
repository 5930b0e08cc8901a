//! One operator's working session.
//!
//! A session owns the operator identity, the views it watches, the
//! reconciliation loops feeding those views, and at most one member lease.
//! Every loop runs on the session's [`TaskTracker`] under a child of the
//! session's [`CancellationToken`], so [`OperatorSession::close`] stops them
//! all and waits for them to exit.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use roster_core::clock::Clock;
use roster_core::error::CoreError;
use roster_core::operator::OperatorProfile;
use roster_core::roster::NameOrder;
use roster_core::scheduling::{BattleCategory, EntryStatus, Squad};
use roster_core::types::{DbId, VersionToken};
use roster_db::models::battle_entry::BattleEntry;
use roster_db::models::battle_event::BattleEvent;
use roster_db::models::member::{CreateMember, Member, UpdateMember};
use roster_db::{ChangeFeed, RecordStore};
use roster_events::{
    ChangeDispatcher, DispatcherConfig, EventBoard, MemberRoster, NoticeBus, ParticipantList,
    Reconciler, ViewNotice,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::coordinator::UpdateCoordinator;
use crate::enrollment::{EnrollmentManager, EnrollmentReport};
use crate::lock_manager::{Lease, LockConfig, LockManager};
use crate::scheduler::EventScheduler;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub lock: LockConfig,
    pub dispatcher: DispatcherConfig,
    /// Category shown on the event board.
    pub category: BattleCategory,
    /// Capacity of the observer notice bus.
    pub notice_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            dispatcher: DispatcherConfig::default(),
            category: BattleCategory::Desert,
            notice_capacity: 256,
        }
    }
}

/// Participant view of the opened event and the token stopping its loop.
struct OpenedEvent {
    view: Arc<ParticipantList>,
    cancel: CancellationToken,
}

type OpenedSlot = Arc<Mutex<Option<OpenedEvent>>>;

pub struct OperatorSession {
    operator: OperatorProfile,
    locks: LockManager,
    coordinator: UpdateCoordinator,
    scheduler: EventScheduler,
    enrollment: EnrollmentManager,
    store: Arc<dyn RecordStore>,
    dispatcher: ChangeDispatcher,
    notices: Arc<NoticeBus>,
    roster: Arc<MemberRoster>,
    board: Arc<EventBoard>,
    opened: OpenedSlot,
    editing: Mutex<Option<Lease>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for OperatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorSession").finish_non_exhaustive()
    }
}

impl OperatorSession {
    /// Open a session for an approved operator and start its view loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        operator: OperatorProfile,
        store: Arc<dyn RecordStore>,
        feed: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, CoreError> {
        operator.ensure_approved()?;

        let notices = Arc::new(NoticeBus::new(config.notice_capacity));
        let dispatcher = ChangeDispatcher::new(feed, config.dispatcher);
        let roster = Arc::new(MemberRoster::new(store.clone(), notices.clone()));
        let board = Arc::new(EventBoard::new(
            store.clone(),
            notices.clone(),
            config.category,
        ));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let opened: OpenedSlot = Arc::new(Mutex::new(None));

        // Subscribe before any loop can publish.
        let watcher_rx = notices.subscribe();
        tracker.spawn(detach_on_delete(watcher_rx, opened.clone(), cancel.clone()));

        for view in [
            roster.clone() as Arc<dyn Reconciler>,
            board.clone(),
        ] {
            let dispatcher = dispatcher.clone();
            let token = cancel.child_token();
            tracker.spawn(async move { dispatcher.run(view, token).await });
        }

        tracing::info!(
            operator = operator.id,
            category = %config.category,
            "Session opened"
        );

        Ok(Self {
            locks: LockManager::new(store.clone(), clock.clone(), config.lock),
            coordinator: UpdateCoordinator::new(store.clone(), clock),
            scheduler: EventScheduler::new(store.clone()),
            enrollment: EnrollmentManager::new(store.clone()),
            operator,
            store,
            dispatcher,
            notices,
            roster,
            board,
            opened,
            editing: Mutex::new(None),
            tracker,
            cancel,
        })
    }

    pub fn operator(&self) -> &OperatorProfile {
        &self.operator
    }

    pub fn notices(&self) -> broadcast::Receiver<ViewNotice> {
        self.notices.subscribe()
    }

    pub fn roster(&self) -> &Arc<MemberRoster> {
        &self.roster
    }

    pub fn board(&self) -> &Arc<EventBoard> {
        &self.board
    }

    /// Participant view of the opened event, if one is open.
    pub fn participants(&self) -> Option<Arc<ParticipantList>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|o| o.view.clone())
    }

    /// The lease this session currently holds, if any.
    pub fn editing(&self) -> Option<Lease> {
        *self.editing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- member edits -------------------------------------------------------

    /// Take the lease on `member_id` for editing.
    ///
    /// Only SUPER and ADMIN operators edit members. A session holds one
    /// lease at a time; a lease on a different member is released first.
    pub async fn begin_edit(&self, member_id: DbId) -> Result<Lease, CoreError> {
        self.operator.ensure_can_manage()?;
        if let Some(prev) = self.editing() {
            if prev.member_id != member_id {
                self.locks.release(prev.member_id, self.operator.id).await?;
                self.set_editing(None);
            }
        }
        let lease = self.locks.acquire(member_id, self.operator.id).await?;
        self.set_editing(Some(lease));
        Ok(lease)
    }

    pub async fn extend_edit(&self, member_id: DbId) -> Result<Lease, CoreError> {
        let lease = self.locks.extend(member_id, self.operator.id).await?;
        self.set_editing(Some(lease));
        Ok(lease)
    }

    /// Write `patch` under the held lease, releasing it.
    pub async fn commit_edit(
        &self,
        member_id: DbId,
        expected: VersionToken,
        patch: UpdateMember,
    ) -> Result<Member, CoreError> {
        let member = self
            .coordinator
            .update(&self.operator, member_id, expected, patch)
            .await?;
        self.clear_editing(member_id);
        self.roster.merge_local(member.clone());
        Ok(member)
    }

    /// Give up the lease without writing.
    pub async fn cancel_edit(&self, member_id: DbId) -> Result<bool, CoreError> {
        let released = self.locks.release(member_id, self.operator.id).await?;
        self.clear_editing(member_id);
        Ok(released)
    }

    pub async fn create_member(&self, input: CreateMember) -> Result<Member, CoreError> {
        self.coordinator.create_member(&self.operator, input).await
    }

    pub async fn delete_member(&self, member_id: DbId) -> Result<(), CoreError> {
        self.coordinator
            .delete_member(&self.operator, member_id)
            .await?;
        self.clear_editing(member_id);
        Ok(())
    }

    // --- events -------------------------------------------------------------

    pub async fn schedule_event(
        &self,
        squad: Squad,
        date: NaiveDate,
    ) -> Result<BattleEvent, CoreError> {
        let event = self
            .scheduler
            .create(&self.operator, self.board.category(), squad, date)
            .await?;
        self.board.merge_local(event.clone());
        Ok(event)
    }

    pub async fn confirm_event(&self, event_id: DbId) -> Result<BattleEvent, CoreError> {
        let event = self.scheduler.confirm(&self.operator, event_id).await?;
        self.board.merge_local(event.clone());
        Ok(event)
    }

    pub async fn delete_event(&self, event_id: DbId) -> Result<(), CoreError> {
        self.scheduler.delete(&self.operator, event_id).await?;
        self.board.purge_local(event_id);
        Ok(())
    }

    /// Re-read one event into the board.
    pub async fn refresh_event(&self, event_id: DbId) -> Result<BattleEvent, CoreError> {
        let event = self.scheduler.refresh(event_id).await?;
        self.board.merge_local(event.clone());
        Ok(event)
    }

    /// Open `event_id` on the board and watch its participants, or close the
    /// opened event with `None`.
    pub async fn select_event(
        &self,
        event_id: Option<DbId>,
    ) -> Result<Option<Arc<ParticipantList>>, CoreError> {
        self.detach_participants();
        let Some(event_id) = event_id else {
            self.board.select(None);
            return Ok(None);
        };

        self.refresh_event(event_id).await?;
        let view = Arc::new(ParticipantList::new(
            self.store.clone(),
            self.notices.clone(),
            event_id,
        ));
        let token = self.cancel.child_token();
        {
            let dispatcher = self.dispatcher.clone();
            let view = view.clone();
            let token = token.clone();
            self.tracker
                .spawn(async move { dispatcher.run(view, token).await });
        }
        *self.opened.lock().unwrap_or_else(PoisonError::into_inner) = Some(OpenedEvent {
            view: view.clone(),
            cancel: token,
        });
        self.board.select(Some(event_id));
        tracing::debug!(event_id, operator = self.operator.id, "Event opened");
        Ok(Some(view))
    }

    // --- enrollment ---------------------------------------------------------

    pub async fn enroll_many(
        &self,
        event_id: DbId,
        member_ids: &[DbId],
    ) -> Result<EnrollmentReport, CoreError> {
        self.enrollment.add_many(event_id, member_ids).await
    }

    pub async fn enroll_one(&self, event_id: DbId, member_id: DbId) -> Result<BattleEntry, CoreError> {
        self.enrollment.add_one(event_id, member_id).await
    }

    pub async fn remove_entry(
        &self,
        event_id: DbId,
        entry_id: DbId,
        expected: VersionToken,
    ) -> Result<(), CoreError> {
        self.enrollment
            .remove_one(event_id, entry_id, expected)
            .await
    }

    pub async fn set_entry_status(
        &self,
        entry_id: DbId,
        expected: VersionToken,
        status: EntryStatus,
    ) -> Result<BattleEntry, CoreError> {
        self.enrollment.set_status(entry_id, expected, status).await
    }

    /// Overwrite a member's power and refresh the opened participant list,
    /// which only listens to entry changes.
    ///
    /// Open to every approved operator and not subject to member leases; see
    /// [`EnrollmentManager::edit_power`].
    pub async fn edit_power(&self, member_id: DbId, power: f64) -> Result<Member, CoreError> {
        let member = self.enrollment.edit_power(member_id, power).await?;
        self.roster.merge_local(member.clone());
        if let Some(view) = self.participants() {
            view.reload().await?;
        }
        Ok(member)
    }

    pub async fn candidates(
        &self,
        event_id: DbId,
        search: &str,
        order: NameOrder,
    ) -> Result<Vec<Member>, CoreError> {
        self.enrollment.candidates(event_id, search, order).await
    }

    // --- lifecycle ----------------------------------------------------------

    /// Stop every loop and release the held lease.
    ///
    /// The release is best effort: a failure is logged and the lease lapses
    /// at its expiry.
    pub async fn close(self) {
        if let Some(lease) = self.editing() {
            if let Err(e) = self.locks.release(lease.member_id, self.operator.id).await {
                tracing::warn!(
                    member_id = lease.member_id,
                    error = %e,
                    "Lease release on close failed"
                );
            }
        }
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(operator = self.operator.id, "Session closed");
    }

    fn set_editing(&self, lease: Option<Lease>) {
        *self.editing.lock().unwrap_or_else(PoisonError::into_inner) = lease;
    }

    fn clear_editing(&self, member_id: DbId) {
        let mut editing = self.editing.lock().unwrap_or_else(PoisonError::into_inner);
        if editing.is_some_and(|l| l.member_id == member_id) {
            *editing = None;
        }
    }

    fn detach_participants(&self) {
        if let Some(opened) = self
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            opened.cancel.cancel();
        }
    }
}

impl Drop for OperatorSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Stop watching the opened event once the board reports it deleted.
async fn detach_on_delete(
    mut rx: broadcast::Receiver<ViewNotice>,
    opened: OpenedSlot,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            notice = rx.recv() => match notice {
                Ok(ViewNotice::SelectedEventDeleted { event_id }) => {
                    let mut slot = opened.lock().unwrap_or_else(PoisonError::into_inner);
                    if slot.as_ref().is_some_and(|o| o.view.event_id() == event_id) {
                        if let Some(o) = slot.take() {
                            o.cancel.cancel();
                        }
                        tracing::info!(event_id, "Participant view detached");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Session watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
