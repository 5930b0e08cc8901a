//! Cached views kept in sync by the dispatcher.

pub mod event_board;
pub mod member_roster;
pub mod participants;

pub use event_board::EventBoard;
pub use member_roster::MemberRoster;
pub use participants::ParticipantList;
