//! # Permission Ledger (pure half)
//!
//! Capability tokens, permission sets, and the authorization check.
//!
//! ## Design
//! Authorization is an explicit capability-set lookup, not inherited
//! behavior: every mutating ledger operation names the [`Permission`] it
//! requires as data, and `authorize(actor, permission)` is a pure function.
//! The database half (loading a user's role inside the operating
//! transaction) lives in `dukan-db::ledger::users`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every mutating entry point:                                            │
//! │                                                                         │
//! │    load_actor(tx, actor_id)          ← role resolved INSIDE the tx      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │    actor.require(Permission::X)?     ← pure check, this module          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │    ...state mutation + audit entry, same transaction...                 │
//! │                                                                         │
//! │  A role revoked mid-operation either commits before us (we see the      │
//! │  new set) or after us (we ran under the old set) - never partially.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Permission
// =============================================================================

/// A capability token required by one or more ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    // Inventory
    ManageProducts,
    AdjustStock,
    RecordPurchase,
    // Sales
    CreateInvoice,
    FinalizeInvoice,
    VoidInvoice,
    // Repairs
    ManageRepairs,
    ConsumeParts,
    // Transfers
    RecordTransfer,
    CorrectTransfer,
    // Administration
    ManageUsers,
    ViewAudit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageProducts => "manage_products",
            Permission::AdjustStock => "adjust_stock",
            Permission::RecordPurchase => "record_purchase",
            Permission::CreateInvoice => "create_invoice",
            Permission::FinalizeInvoice => "finalize_invoice",
            Permission::VoidInvoice => "void_invoice",
            Permission::ManageRepairs => "manage_repairs",
            Permission::ConsumeParts => "consume_parts",
            Permission::RecordTransfer => "record_transfer",
            Permission::CorrectTransfer => "correct_transfer",
            Permission::ManageUsers => "manage_users",
            Permission::ViewAudit => "view_audit",
        }
    }
}

// =============================================================================
// Permission Set
// =============================================================================

/// The set of capabilities a role owns.
///
/// Serializes as a plain JSON array of tokens, which is also how it is
/// stored in the `roles.permissions` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// Empty set (denies everything).
    pub fn empty() -> Self {
        PermissionSet(BTreeSet::new())
    }

    /// Every capability; for the administrator role.
    pub fn all() -> Self {
        PermissionSet(BTreeSet::from([
            Permission::ManageProducts,
            Permission::AdjustStock,
            Permission::RecordPurchase,
            Permission::CreateInvoice,
            Permission::FinalizeInvoice,
            Permission::VoidInvoice,
            Permission::ManageRepairs,
            Permission::ConsumeParts,
            Permission::RecordTransfer,
            Permission::CorrectTransfer,
            Permission::ManageUsers,
            Permission::ViewAudit,
        ]))
    }

    /// Typical front-counter cashier: sell and record transfers, nothing
    /// destructive.
    pub fn cashier() -> Self {
        PermissionSet(BTreeSet::from([
            Permission::CreateInvoice,
            Permission::FinalizeInvoice,
            Permission::RecordTransfer,
        ]))
    }

    /// Workshop technician: run repair tickets and draw parts.
    pub fn technician() -> Self {
        PermissionSet(BTreeSet::from([
            Permission::ManageRepairs,
            Permission::ConsumeParts,
        ]))
    }

    pub fn grant(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    pub fn revoke(&mut self, permission: Permission) {
        self.0.remove(&permission);
    }

    #[inline]
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        PermissionSet(iter.into_iter().collect())
    }
}

// =============================================================================
// Actor
// =============================================================================

/// A resolved, authenticated actor: user identity plus the permission set
/// of their role at the moment the operating transaction read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub username: String,
    pub permissions: PermissionSet,
}

impl Actor {
    /// Pure authorization check: may this actor perform the operation?
    #[inline]
    pub fn authorize(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Fails with `PermissionDenied` and no other effect.
    pub fn require(&self, permission: Permission) -> CoreResult<()> {
        if self.authorize(permission) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                actor: self.username.clone(),
                permission: permission.as_str().to_string(),
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_with(permissions: PermissionSet) -> Actor {
        Actor {
            user_id: "u1".into(),
            username: "sara".into(),
            permissions,
        }
    }

    #[test]
    fn test_require_granted() {
        let actor = actor_with(PermissionSet::cashier());
        assert!(actor.require(Permission::FinalizeInvoice).is_ok());
    }

    #[test]
    fn test_require_denied() {
        let actor = actor_with(PermissionSet::cashier());
        let err = actor.require(Permission::VoidInvoice).unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(
            err.to_string(),
            "Permission denied: sara lacks 'void_invoice'"
        );
    }

    #[test]
    fn test_empty_set_denies_everything() {
        let actor = actor_with(PermissionSet::empty());
        assert!(!actor.authorize(Permission::CreateInvoice));
        assert!(!actor.authorize(Permission::ViewAudit));
    }

    #[test]
    fn test_grant_revoke() {
        let mut set = PermissionSet::empty();
        set.grant(Permission::AdjustStock);
        assert!(set.contains(Permission::AdjustStock));
        set.revoke(Permission::AdjustStock);
        assert!(!set.contains(Permission::AdjustStock));
    }

    #[test]
    fn test_json_round_trip() {
        let set = PermissionSet::technician();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["manage_repairs","consume_parts"]"#);
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
