//! Member roster rules: input normalization, pagination, candidate lists.

use crate::types::DbId;

/// Members shown per roster page.
pub const MEMBERS_PER_PAGE: i64 = 10;

/// Maximum member name length in characters.
pub const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Trim and validate a member name. Returns the trimmed name or an error message.
pub fn normalize_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("Member name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "Member name must be at most {MAX_NAME_LEN} characters"
        ));
    }
    Ok(name.to_string())
}

/// Validate a squad power value. Must be finite and non-negative.
pub fn validate_squad_power(value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Squad power must be a non-negative number, got {value}"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Zero-based inclusive `(from, to)` row range for a 1-based page number.
///
/// Pages below 1 are treated as page 1. Ranges past `i64::MAX` saturate,
/// which reads as an empty page.
pub fn page_range(page: i64) -> (i64, i64) {
    let page = page.max(1);
    let from = (page - 1).saturating_mul(MEMBERS_PER_PAGE);
    (from, from.saturating_add(MEMBERS_PER_PAGE - 1))
}

/// Number of pages for `total` rows. Always at least one.
pub fn total_pages(total: i64) -> i64 {
    let partial = i64::from(total % MEMBERS_PER_PAGE > 0);
    (total / MEMBERS_PER_PAGE + partial).max(1)
}

// ---------------------------------------------------------------------------
// Candidate selection
// ---------------------------------------------------------------------------

/// Sort direction for name-ordered lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter and order enrollment candidates.
///
/// Drops members already enrolled, keeps names containing `search`
/// (case-insensitive, trimmed; empty search keeps everyone), and sorts by
/// lowercase name in the requested direction.
pub fn select_candidates<T, F>(
    members: Vec<T>,
    enrolled: &[DbId],
    search: &str,
    order: NameOrder,
    key: F,
) -> Vec<T>
where
    F: Fn(&T) -> (DbId, &str),
{
    let needle = search.trim().to_lowercase();
    let mut out: Vec<T> = members
        .into_iter()
        .filter(|m| !enrolled.contains(&key(m).0))
        .filter(|m| needle.is_empty() || key(m).1.to_lowercase().contains(&needle))
        .collect();

    out.sort_by(|a, b| {
        let a = key(a).1.to_lowercase();
        let b = key(b).1.to_lowercase();
        match order {
            NameOrder::Ascending => a.cmp(&b),
            NameOrder::Descending => b.cmp(&a),
        }
    });
    out
}
