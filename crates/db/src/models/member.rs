//! Member model and DTOs.

use roster_core::error::CoreError;
use roster_core::locking::LeaseStatus;
use roster_core::roster::{normalize_name, validate_squad_power};
use roster_core::types::{DbId, Timestamp, VersionToken};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `members` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Member {
    pub id: DbId,
    pub name: String,
    pub first_squad_power: Option<f64>,
    pub hero_power: Option<i64>,
    pub version: VersionToken,
    pub lock_holder: Option<DbId>,
    pub lock_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Member {
    /// Lease state of this row as seen by `viewer` at `now`.
    pub fn lease_status(&self, viewer: DbId, now: Timestamp) -> LeaseStatus {
        LeaseStatus::evaluate(self.lock_holder, self.lock_expires_at, viewer, now)
    }
}

/// DTO for creating a member.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct CreateMember {
    pub name: String,
    #[validate(range(min = 0.0))]
    pub first_squad_power: Option<f64>,
    #[validate(range(min = 0))]
    pub hero_power: Option<i64>,
}

/// DTO for an in-place edit. Replaces all editable fields; `None` clears
/// a power value.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct UpdateMember {
    pub name: String,
    #[validate(range(min = 0.0))]
    pub first_squad_power: Option<f64>,
    #[validate(range(min = 0))]
    pub hero_power: Option<i64>,
}

impl CreateMember {
    /// Trim the name and validate every field.
    pub fn normalized(mut self) -> Result<Self, CoreError> {
        self.name = normalize_name(&self.name).map_err(CoreError::Validation)?;
        if let Some(power) = self.first_squad_power {
            validate_squad_power(power).map_err(CoreError::Validation)?;
        }
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(self)
    }
}

impl UpdateMember {
    /// Trim the name and validate every field.
    pub fn normalized(mut self) -> Result<Self, CoreError> {
        self.name = normalize_name(&self.name).map_err(CoreError::Validation)?;
        if let Some(power) = self.first_squad_power {
            validate_squad_power(power).map_err(CoreError::Validation)?;
        }
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(self)
    }
}

/// One page of the roster plus the exact total row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberPage {
    pub page: i64,
    pub total: i64,
    pub rows: Vec<Member>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn normalized_trims_name() {
        let input = CreateMember {
            name: "  Nova  ".into(),
            first_squad_power: Some(12.5),
            hero_power: None,
        }
        .normalized()
        .unwrap();
        assert_eq!(input.name, "Nova");
    }

    #[test]
    fn blank_name_is_rejected() {
        let result = UpdateMember {
            name: " ".into(),
            first_squad_power: None,
            hero_power: None,
        }
        .normalized();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn negative_powers_are_rejected() {
        let result = CreateMember {
            name: "Nova".into(),
            first_squad_power: Some(-1.0),
            hero_power: None,
        }
        .normalized();
        assert_matches!(result, Err(CoreError::Validation(_)));

        let result = CreateMember {
            name: "Nova".into(),
            first_squad_power: None,
            hero_power: Some(-5),
        }
        .normalized();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn non_finite_power_is_rejected() {
        for power in [f64::NAN, f64::INFINITY] {
            let result = CreateMember {
                name: "Nova".into(),
                first_squad_power: Some(power),
                hero_power: None,
            }
            .normalized();
            assert_matches!(result, Err(CoreError::Validation(_)));

            let result = UpdateMember {
                name: "Nova".into(),
                first_squad_power: Some(power),
                hero_power: None,
            }
            .normalized();
            assert_matches!(result, Err(CoreError::Validation(_)));
        }
    }
}
