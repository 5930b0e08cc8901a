//! Battle event categories, squads, and weekday eligibility.
//!
//! Each squad plays on exactly one weekday. A slot is the
//! `(category, squad, date)` triple and the store guarantees it is unique.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

define_text_enum! {
    /// Battle type tag carried by every event.
    BattleCategory {
        Desert = "DESERT",
    }
}

define_text_enum! {
    /// The squad an event is scheduled for.
    Squad {
        A = "A",
        B = "B",
    }
}

define_text_enum! {
    /// Event lifecycle. `Pending` until an operator confirms it.
    EventStatus {
        Pending = "PENDING",
        Confirmed = "CONFIRMED",
    }
}

define_text_enum! {
    /// Per-entry participation status.
    EntryStatus {
        Pending = "PENDING",
        Confirmed = "CONFIRMED",
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        EventStatus::Pending
    }
}

impl Default for EntryStatus {
    fn default() -> Self {
        EntryStatus::Pending
    }
}

impl Squad {
    /// The only weekday this squad may be scheduled on.
    pub fn allowed_weekday(self) -> Weekday {
        match self {
            Squad::A => Weekday::Fri,
            Squad::B => Weekday::Sat,
        }
    }

    /// Kickoff time in KST.
    pub fn kickoff_time(self) -> NaiveTime {
        match self {
            Squad::A => NaiveTime::from_hms_opt(20, 0, 0),
            Squad::B => NaiveTime::from_hms_opt(10, 0, 0),
        }
        .unwrap_or(NaiveTime::MIN)
    }
}

/// Returns `true` if `date` falls on the squad's weekday.
pub fn is_date_allowed(squad: Squad, date: NaiveDate) -> bool {
    date.weekday() == squad.allowed_weekday()
}

/// Validate a requested slot date. Returns `Ok(())` or an error message.
pub fn validate_slot_date(squad: Squad, date: NaiveDate) -> Result<(), String> {
    if is_date_allowed(squad, date) {
        return Ok(());
    }
    Err(format!(
        "Squad {squad} can only be scheduled on {:?}, but {date} is a {:?}",
        squad.allowed_weekday(),
        date.weekday()
    ))
}

/// First date on or after `from` that the squad may be scheduled on.
pub fn next_eligible_date(squad: Squad, from: NaiveDate) -> NaiveDate {
    let target = squad.allowed_weekday().num_days_from_monday() as i64;
    let current = from.weekday().num_days_from_monday() as i64;
    let offset = (target - current).rem_euclid(7);
    from + Duration::days(offset)
}

/// Human-readable slot label, e.g. `2026-10-16 20:00 KST`.
pub fn display_label(date: NaiveDate, squad: Squad) -> String {
    format!(
        "{} {} KST",
        date.format("%Y-%m-%d"),
        squad.kickoff_time().format("%H:%M")
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
