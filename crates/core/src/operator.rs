//! Operator identity and permission checks.
//!
//! Authentication lives outside this system; it hands us an
//! [`OperatorProfile`] whose `id` doubles as the lease holder identity.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

define_text_enum! {
    /// Account permission level.
    Permission {
        Super = "SUPER",
        Admin = "ADMIN",
        Member = "MEMBER",
    }
}

define_text_enum! {
    /// Account approval state.
    ApprovalStatus {
        Pending = "PENDING",
        Approved = "APPROVED",
        Rejected = "REJECTED",
    }
}

impl Permission {
    /// SUPER and ADMIN may manage members and schedule events.
    pub fn can_manage(self) -> bool {
        matches!(self, Permission::Super | Permission::Admin)
    }
}

/// The authenticated operator driving a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorProfile {
    pub id: DbId,
    pub permission: Permission,
    pub approval: ApprovalStatus,
}

impl OperatorProfile {
    pub fn new(id: DbId, permission: Permission) -> Self {
        Self {
            id,
            permission,
            approval: ApprovalStatus::Approved,
        }
    }

    /// Reject operators whose account has not been approved.
    pub fn ensure_approved(&self) -> Result<(), CoreError> {
        if self.approval == ApprovalStatus::Approved {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!(
                "Operator {} is not approved (status {})",
                self.id, self.approval
            )))
        }
    }

    /// Reject operators without SUPER or ADMIN permission.
    pub fn ensure_can_manage(&self) -> Result<(), CoreError> {
        if self.permission.can_manage() {
            Ok(())
        } else {
            Err(CoreError::Forbidden(format!(
                "Operator {} needs SUPER or ADMIN permission, has {}",
                self.id, self.permission
            )))
        }
    }
}
