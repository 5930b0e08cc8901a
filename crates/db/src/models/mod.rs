pub mod battle_entry;
pub mod battle_event;
pub mod member;
