//! Capability checks for administrative actions.
//!
//! Callers resolve an identity into a [`Principal`] through the
//! [`AccessPolicy`] and hand it to operations that need a capability.
//! Admin identities come from `ADMIN_EMAILS`; everyone else holds no
//! capabilities.

use std::collections::HashSet;

use crate::error::LedgerError;

/// An administrative capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ApproveDeposits,
    ApproveWithdrawals,
}

impl Permission {
    pub const ALL: [Permission; 2] = [Permission::ApproveDeposits, Permission::ApproveWithdrawals];
}

/// A resolved caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identity: String,
    permissions: HashSet<Permission>,
}

impl Principal {
    pub fn new(identity: &str, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            identity: identity.trim().to_lowercase(),
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// `Unauthorized` unless the principal holds `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), LedgerError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(format!(
                "{} lacks {:?}",
                self.identity, permission
            )))
        }
    }
}

/// Maps identities to principals.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    admins: HashSet<String>,
}

impl AccessPolicy {
    pub fn new(admin_identities: &[String]) -> Self {
        Self {
            admins: admin_identities.iter().map(|s| s.trim().to_lowercase()).collect(),
        }
    }

    pub fn resolve(&self, identity: &str) -> Principal {
        let identity = identity.trim().to_lowercase();
        if self.admins.contains(&identity) {
            Principal::new(&identity, Permission::ALL)
        } else {
            Principal::new(&identity, [])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_resolves_with_all_permissions() {
        let policy = AccessPolicy::new(&["ops@example.com".to_string()]);
        let admin = policy.resolve(" OPS@example.com ");
        assert!(admin.require(Permission::ApproveWithdrawals).is_ok());
        assert!(admin.has(Permission::ApproveDeposits));
    }

    #[test]
    fn test_unknown_identity_is_unauthorized() {
        let policy = AccessPolicy::new(&["ops@example.com".to_string()]);
        let user = policy.resolve("alice@example.com");
        let err = user.require(Permission::ApproveDeposits).unwrap_err();
        assert_eq!(err.kind(), "UNAUTHORIZED");
    }
}
