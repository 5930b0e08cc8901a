//! Per-table repositories over a `PgPool`.
//!
//! Each repository is a zero-sized struct with async methods that take the
//! pool explicitly. Conditional writes encode their preconditions in the
//! `WHERE` clause and report "precondition failed" as `None` / `false`.

pub mod battle_entry_repo;
pub mod battle_event_repo;
pub mod member_repo;

pub use battle_entry_repo::BattleEntryRepo;
pub use battle_event_repo::BattleEventRepo;
pub use member_repo::MemberRepo;
