//! PostgreSQL-backed store tests. Need `DATABASE_URL`; run with
//! `cargo test -p roster-db -- --ignored`.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use roster_core::scheduling::{BattleCategory, EntryStatus, EventStatus, Squad};
use roster_db::error::{FK_ENTRY_EVENT, UQ_ENTRY_MEMBER, UQ_EVENT_SLOT};
use roster_db::models::battle_event::CreateBattleEvent;
use roster_db::models::member::{CreateMember, UpdateMember};
use roster_db::{
    ChangeFeed, ChangeOp, FeedMessage, PgChangeFeed, PgStore, RecordStore, Table, WriteGuard,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn member(name: &str) -> CreateMember {
    CreateMember {
        name: name.into(),
        first_squad_power: Some(100.0),
        hero_power: None,
    }
}

fn friday() -> CreateBattleEvent {
    CreateBattleEvent {
        category: BattleCategory::Desert,
        squad: Squad::A,
        scheduled_on: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn slot_uniqueness_is_enforced(pool: PgPool) {
    let store = PgStore::new(pool);
    store.insert_event(&friday()).await.unwrap();
    let err = store.insert_event(&friday()).await.unwrap_err();
    assert!(err.is_unique_violation(UQ_EVENT_SLOT));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn bulk_enroll_skips_duplicates_and_maintains_count(pool: PgPool) {
    let store = PgStore::new(pool);
    let event = store.insert_event(&friday()).await.unwrap();
    let a = store.insert_member(&member("a")).await.unwrap();
    let b = store.insert_member(&member("b")).await.unwrap();

    assert_eq!(store.insert_entries(event.id, &[a.id]).await.unwrap().len(), 1);
    let second = store.insert_entries(event.id, &[a.id, b.id]).await.unwrap();
    assert_eq!(second.len(), 1);

    let err = store.insert_entry(event.id, a.id).await.unwrap_err();
    assert!(err.is_unique_violation(UQ_ENTRY_MEMBER));

    let event = store.find_event(event.id).await.unwrap().unwrap();
    assert_eq!(event.applicant_count, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn entry_for_missing_event_is_foreign_key_violation(pool: PgPool) {
    let store = PgStore::new(pool);
    let a = store.insert_member(&member("a")).await.unwrap();
    let err = store.insert_entry(424242, a.id).await.unwrap_err();
    assert!(err.is_foreign_key_violation(FK_ENTRY_EVENT));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn event_delete_cascades(pool: PgPool) {
    let store = PgStore::new(pool);
    let event = store.insert_event(&friday()).await.unwrap();
    let a = store.insert_member(&member("a")).await.unwrap();
    store.insert_entries(event.id, &[a.id]).await.unwrap();

    assert!(store.delete_event(event.id).await.unwrap());
    assert_eq!(store.count_entries(event.id).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn lease_and_guarded_update(pool: PgPool) {
    let store = PgStore::new(pool);
    let m = store.insert_member(&member("a")).await.unwrap();
    let now = Utc::now();
    let until = now + chrono::Duration::minutes(5);

    let locked = store.try_lock_member(m.id, 1, now, until).await.unwrap().unwrap();
    assert_ne!(locked.version, m.version);
    assert!(store.try_lock_member(m.id, 2, now, until).await.unwrap().is_none());

    let patch = UpdateMember {
        name: "Nova".into(),
        first_squad_power: Some(1.0),
        hero_power: None,
    };
    let stale = store
        .update_member(m.id, &patch, WriteGuard::leased(1, m.version))
        .await
        .unwrap();
    assert!(stale.is_none());

    let updated = store
        .update_member(m.id, &patch, WriteGuard::leased(1, locked.version))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Nova");
    assert_eq!(updated.lock_holder, None);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn confirm_and_status_changes(pool: PgPool) {
    let store = PgStore::new(pool);
    let event = store.insert_event(&friday()).await.unwrap();
    let confirmed = store.confirm_event(event.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, EventStatus::Confirmed);
    assert!(store.confirm_event(event.id).await.unwrap().is_none());

    let a = store.insert_member(&member("a")).await.unwrap();
    let entry = store.insert_entry(event.id, a.id).await.unwrap();
    let changed = store
        .set_entry_status(entry.id, entry.version, EntryStatus::Confirmed)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(changed.version, entry.version);
    assert!(!store
        .delete_entry(event.id, entry.id, entry.version)
        .await
        .unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn notifications_reach_table_listeners(pool: PgPool) {
    let feed = std::sync::Arc::new(PgChangeFeed::new(
        pool.clone(),
        64,
        Duration::from_millis(100),
    ));
    let cancel = CancellationToken::new();
    let pump = {
        let feed = feed.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { feed.run(cancel).await })
    };
    let mut rx = feed.listen(Table::Members).await.unwrap();
    // Give the listener time to issue LISTEN.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let store = PgStore::new(pool);
    let created = store.insert_member(&member("a")).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let FeedMessage::Change(change) = msg else {
        panic!("expected a change, got {msg:?}");
    };
    assert_eq!(change.op, ChangeOp::Inserted);
    assert_eq!(change.row_id(), Some(created.id));

    cancel.cancel();
    pump.await.unwrap();
}
