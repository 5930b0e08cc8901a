//! Change stream dispatcher.
//!
//! [`ChangeDispatcher::subscribe`] opens a filtered [`Subscription`] on one
//! table. [`ChangeDispatcher::spawn`] drives a [`Reconciler`] from such a
//! subscription until cancelled:
//!
//! 1. subscribe first, then load, so no change slips between the two;
//! 2. apply each matching change to the reconciler's cache;
//! 3. on overflow (`Lagged`), an upstream gap or a change that cannot be
//!    applied, reload the cache;
//! 4. on a closed channel, re-subscribe with exponential backoff and reload.
//!
//! A reload that fails is retried with the same backoff until it succeeds or
//! the loop is cancelled. The reconciler keeps its last cache meanwhile.
//!
//! Nothing tries to fill gaps from sequence numbers; every loss of
//! continuity ends in a full reload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roster_core::error::CoreError;
use roster_db::{ChangeFeed, FeedMessage, RowChange, RowFilter, StoreError, Table};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// DispatcherConfig
// ---------------------------------------------------------------------------

/// Timing for re-subscription and reload retries.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// First retry delay; doubles on each consecutive failure.
    pub initial_backoff: Duration,
    /// Retry delay cap.
    pub max_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Why a view reloaded from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ResyncReason {
    /// First load after subscribing.
    Initial,
    /// The bounded channel overflowed and `skipped` changes were dropped.
    Lagged { skipped: u64 },
    /// The feed reported lost continuity upstream.
    Gap,
    /// The channel closed and was re-opened.
    Reconnected,
    /// A change could not be applied incrementally.
    ApplyFailed,
}

/// What a [`Subscription`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Change(RowChange),
    /// Continuity was lost; the consumer must reload.
    Resync(ResyncReason),
}

/// A per-table change channel with an optional row filter.
pub struct Subscription {
    table: Table,
    filter: Option<RowFilter>,
    receiver: broadcast::Receiver<FeedMessage>,
}

impl Subscription {
    pub fn table(&self) -> Table {
        self.table
    }

    /// Next matching delivery, or `None` once the channel has closed.
    ///
    /// Changes that do not pass the filter are skipped.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(FeedMessage::Change(change)) => {
                    if self.filter.as_ref().map_or(true, |f| f.matches(&change)) {
                        return Some(Delivery::Change(change));
                    }
                }
                Ok(FeedMessage::Gap) => return Some(Delivery::Resync(ResyncReason::Gap)),
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Delivery::Resync(ResyncReason::Lagged { skipped }))
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// A cached view kept in sync by the dispatcher.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    fn table(&self) -> Table;

    fn filter(&self) -> Option<RowFilter> {
        None
    }

    /// Fold one change into the cache.
    async fn apply(&self, change: RowChange) -> Result<(), CoreError>;

    /// Reload the cache from the store. On failure the cache must keep its
    /// last state; the dispatcher retries.
    async fn resync(&self, reason: ResyncReason) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// ChangeDispatcher
// ---------------------------------------------------------------------------

/// Opens subscriptions on a [`ChangeFeed`] and runs reconciliation loops.
#[derive(Clone)]
pub struct ChangeDispatcher {
    feed: Arc<dyn ChangeFeed>,
    config: DispatcherConfig,
}

impl ChangeDispatcher {
    pub fn new(feed: Arc<dyn ChangeFeed>, config: DispatcherConfig) -> Self {
        Self { feed, config }
    }

    /// Open a channel on `table`, optionally filtered.
    pub async fn subscribe(
        &self,
        table: Table,
        filter: Option<RowFilter>,
    ) -> Result<Subscription, StoreError> {
        let receiver = self.feed.listen(table).await?;
        Ok(Subscription {
            table,
            filter,
            receiver,
        })
    }

    /// Spawn the reconciliation loop for `reconciler`.
    pub fn spawn(
        &self,
        reconciler: Arc<dyn Reconciler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run(reconciler, cancel).await })
    }

    /// Run the reconciliation loop until `cancel` fires.
    pub async fn run(&self, reconciler: Arc<dyn Reconciler>, cancel: CancellationToken) {
        let view = reconciler.name();
        let mut backoff = self.config.initial_backoff;
        let mut reason = ResyncReason::Initial;

        loop {
            match self.subscribe(reconciler.table(), reconciler.filter()).await {
                Ok(mut subscription) => {
                    backoff = self.config.initial_backoff;
                    tracing::debug!(view, table = %subscription.table(), "Subscribed");
                    let live = self.resync(reconciler.as_ref(), reason, &cancel).await
                        && self.pump(reconciler.as_ref(), &mut subscription, &cancel).await;
                    if !live {
                        tracing::debug!(view, "Reconciliation loop cancelled");
                        return;
                    }
                    tracing::warn!(view, "Change channel closed, re-subscribing");
                }
                Err(e) => {
                    tracing::error!(view, error = %e, "Subscribe failed");
                }
            }

            reason = ResyncReason::Reconnected;
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(view, "Reconciliation loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = self.config.next_backoff(backoff);
        }
    }

    /// Feed deliveries to the reconciler. Returns `false` when cancelled and
    /// `true` when the channel closed.
    async fn pump(
        &self,
        reconciler: &dyn Reconciler,
        subscription: &mut Subscription,
        cancel: &CancellationToken,
    ) -> bool {
        let view = reconciler.name();
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => return false,
                delivery = subscription.next() => delivery,
            };
            let reason = match delivery {
                Some(Delivery::Change(change)) => {
                    let op = change.op;
                    let row_id = change.row_id();
                    match reconciler.apply(change).await {
                        Ok(()) => continue,
                        Err(e) => {
                            tracing::warn!(view, ?op, ?row_id, error = %e, "Apply failed, resyncing");
                            ResyncReason::ApplyFailed
                        }
                    }
                }
                Some(Delivery::Resync(reason)) => {
                    tracing::warn!(view, ?reason, "Lost change continuity, resyncing");
                    reason
                }
                None => return true,
            };
            if !self.resync(reconciler, reason, cancel).await {
                return false;
            }
        }
    }

    /// Reload until it succeeds. Returns `false` when cancelled first.
    async fn resync(
        &self,
        reconciler: &dyn Reconciler,
        reason: ResyncReason,
        cancel: &CancellationToken,
    ) -> bool {
        let view = reconciler.name();
        let mut backoff = self.config.initial_backoff;
        loop {
            match reconciler.resync(reason).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        view,
                        ?reason,
                        error = %e,
                        retry_in = ?backoff,
                        "Resync failed, retrying"
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = self.config.next_backoff(backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use roster_core::clock::SystemClock;
    use roster_db::models::member::CreateMember;
    use roster_db::{ChangeOp, MemoryStore, RecordStore};
    use serde_json::json;

    use super::*;

    fn entry_change(id: i64, event_id: i64) -> RowChange {
        RowChange {
            table: Table::BattleEntries,
            op: ChangeOp::Inserted,
            old: None,
            new: Some(json!({"id": id, "event_id": event_id})),
        }
    }

    /// Feed whose channels can be closed on demand.
    #[derive(Default)]
    struct ClosableFeed {
        senders: Mutex<Vec<broadcast::Sender<FeedMessage>>>,
    }

    impl ClosableFeed {
        fn send(&self, msg: FeedMessage) {
            for s in self.senders.lock().unwrap().iter() {
                let _ = s.send(msg.clone());
            }
        }

        fn close_all(&self) {
            self.senders.lock().unwrap().clear();
        }

        fn listens(&self) -> usize {
            self.senders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChangeFeed for ClosableFeed {
        async fn listen(
            &self,
            _table: Table,
        ) -> Result<broadcast::Receiver<FeedMessage>, StoreError> {
            let (tx, rx) = broadcast::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    /// Records what the loop asked it to do.
    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<Option<i64>>>,
        resyncs: Mutex<Vec<ResyncReason>>,
        /// Number of upcoming resyncs that fail.
        failing_resyncs: AtomicUsize,
        signal: tokio::sync::Notify,
    }

    impl Recorder {
        fn failing(resyncs: usize) -> Self {
            Self {
                failing_resyncs: AtomicUsize::new(resyncs),
                ..Self::default()
            }
        }

        fn resync_count(&self) -> usize {
            self.resyncs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Reconciler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn table(&self) -> Table {
            Table::BattleEntries
        }

        fn filter(&self) -> Option<RowFilter> {
            Some(RowFilter::eq("event_id", 1))
        }

        async fn apply(&self, change: RowChange) -> Result<(), CoreError> {
            self.applied.lock().unwrap().push(change.row_id());
            self.signal.notify_one();
            Ok(())
        }

        async fn resync(&self, reason: ResyncReason) -> Result<(), CoreError> {
            self.resyncs.lock().unwrap().push(reason);
            let failing = self
                .failing_resyncs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(CoreError::Transport("store offline".into()));
            }
            self.signal.notify_one();
            Ok(())
        }
    }

    async fn wait(recorder: &Recorder) {
        tokio::time::timeout(Duration::from_secs(2), recorder.signal.notified())
            .await
            .expect("reconciler was not called");
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscription_skips_rows_outside_filter() {
        let feed = Arc::new(ClosableFeed::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), DispatcherConfig::default());
        let mut sub = dispatcher
            .subscribe(Table::BattleEntries, Some(RowFilter::eq("event_id", 1)))
            .await
            .unwrap();

        feed.send(FeedMessage::Change(entry_change(10, 2)));
        feed.send(FeedMessage::Change(entry_change(11, 1)));

        let Some(Delivery::Change(change)) = sub.next().await else {
            panic!("expected a change");
        };
        assert_eq!(change.row_id(), Some(11));
    }

    #[tokio::test]
    async fn overflow_surfaces_as_lagged_resync() {
        let store = Arc::new(MemoryStore::with_capacity(Arc::new(SystemClock), 2));
        let dispatcher = ChangeDispatcher::new(store.clone(), DispatcherConfig::default());
        let mut sub = dispatcher.subscribe(Table::Members, None).await.unwrap();

        for i in 0..5 {
            let input = CreateMember {
                name: format!("m{i}"),
                first_squad_power: None,
                hero_power: None,
            };
            store.insert_member(&input).await.unwrap();
        }

        assert_eq!(
            sub.next().await,
            Some(Delivery::Resync(ResyncReason::Lagged { skipped: 3 }))
        );
    }

    #[tokio::test]
    async fn gap_surfaces_as_resync_and_close_as_none() {
        let feed = Arc::new(ClosableFeed::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), DispatcherConfig::default());
        let mut sub = dispatcher.subscribe(Table::Members, None).await.unwrap();

        feed.send(FeedMessage::Gap);
        assert_eq!(sub.next().await, Some(Delivery::Resync(ResyncReason::Gap)));

        feed.close_all();
        assert_eq!(sub.next().await, None);
    }

    // -----------------------------------------------------------------------
    // Reconciliation loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn loop_loads_first_then_applies_filtered_changes() {
        let feed = Arc::new(ClosableFeed::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), DispatcherConfig::default());
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = dispatcher.spawn(recorder.clone(), cancel.clone());

        wait(&recorder).await;
        assert_eq!(*recorder.resyncs.lock().unwrap(), vec![ResyncReason::Initial]);

        feed.send(FeedMessage::Change(entry_change(5, 9)));
        feed.send(FeedMessage::Change(entry_change(6, 1)));
        wait(&recorder).await;
        assert_eq!(*recorder.applied.lock().unwrap(), vec![Some(6)]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_reopened_and_reloaded() {
        let feed = Arc::new(ClosableFeed::default());
        let config = DispatcherConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        };
        let dispatcher = ChangeDispatcher::new(feed.clone(), config);
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = dispatcher.spawn(recorder.clone(), cancel.clone());

        wait(&recorder).await;
        feed.close_all();
        wait(&recorder).await;

        assert_eq!(
            *recorder.resyncs.lock().unwrap(),
            vec![ResyncReason::Initial, ResyncReason::Reconnected]
        );
        assert_eq!(feed.listens(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    fn fast() -> DispatcherConfig {
        DispatcherConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn failed_reload_is_retried_until_it_succeeds() {
        let feed = Arc::new(ClosableFeed::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), fast());
        let recorder = Arc::new(Recorder::failing(2));
        let cancel = CancellationToken::new();
        let handle = dispatcher.spawn(recorder.clone(), cancel.clone());

        wait(&recorder).await;
        assert_eq!(
            *recorder.resyncs.lock().unwrap(),
            vec![ResyncReason::Initial; 3]
        );

        // Still pumping after the retries.
        feed.send(FeedMessage::Change(entry_change(6, 1)));
        wait(&recorder).await;
        assert_eq!(*recorder.applied.lock().unwrap(), vec![Some(6)]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_a_failing_reload() {
        let feed = Arc::new(ClosableFeed::default());
        let dispatcher = ChangeDispatcher::new(feed.clone(), fast());
        let recorder = Arc::new(Recorder::failing(usize::MAX));
        let cancel = CancellationToken::new();
        let handle = dispatcher.spawn(recorder.clone(), cancel.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while recorder.resync_count() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "reload was not retried");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop ignored cancellation")
            .unwrap();
        assert!(recorder.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let config = DispatcherConfig::default();
        assert_eq!(
            config.next_backoff(Duration::from_millis(500)),
            Duration::from_secs(1)
        );
        assert_eq!(
            config.next_backoff(Duration::from_secs(20)),
            Duration::from_secs(30)
        );
    }
}
