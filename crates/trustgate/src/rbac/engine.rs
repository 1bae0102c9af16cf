// Trustgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Permission checks against verified tokens

use crate::error::{GuardError, GuardResult};
use crate::rbac::roles::{Permission, PermissionTable};
use crate::token::{Claims, TokenService};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of an authorization attempt, kept for audit
#[derive(Debug)]
pub enum Denial {
    /// The token did not verify; carries the verification error
    Unauthenticated(GuardError),
    /// The token verified but lacks the permission
    Missing(Claims),
}

/// Guards privileged operations with the static role table
#[derive(Debug)]
pub struct PermissionEngine {
    tokens: Arc<TokenService>,
    table: &'static PermissionTable,
    enabled: bool,
}

impl PermissionEngine {
    pub fn new(tokens: Arc<TokenService>, enabled: bool) -> Self {
        Self {
            tokens,
            table: PermissionTable::global(),
            enabled,
        }
    }

    pub fn table(&self) -> &'static PermissionTable {
        self.table
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Verify then check membership, keeping the reason for a denial
    ///
    /// With RBAC disabled, any token that verifies is admitted.
    pub fn authorize(&self, token: &str, permission: Permission) -> Result<Claims, Denial> {
        let claims = self.tokens.verify(token).map_err(Denial::Unauthenticated)?;

        if !self.enabled || claims.has_permission(permission) {
            debug!(user_id = %claims.user_id, permission = %permission, "Permission granted");
            Ok(claims)
        } else {
            Err(Denial::Missing(claims))
        }
    }

    /// Verification failures yield `false`, never an error
    pub fn has_permission(&self, token: &str, permission: Permission) -> bool {
        self.authorize(token, permission).is_ok()
    }

    /// Fail with `InsufficientPermission` for a bad token or a missing grant alike
    pub fn require_permission(&self, token: &str, permission: Permission) -> GuardResult<Claims> {
        self.authorize(token, permission).map_err(|denial| {
            match &denial {
                Denial::Unauthenticated(error) => warn!(permission = %permission, kind = error.audit_kind(), "Permission check on unverifiable token"),
                Denial::Missing(claims) => warn!(user_id = %claims.user_id, role = %claims.role, permission = %permission, "Permission denied"),
            }
            GuardError::InsufficientPermission { required: permission }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rbac::Role;
    use crate::session::SessionStore;
    use crate::users::User;
    use chrono::Utc;
    use std::time::Duration;

    fn engine(enabled: bool, role: Role) -> (PermissionEngine, String) {
        let clock = Arc::new(ManualClock::starting_now());
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600), clock.clone()));
        let tokens = Arc::new(TokenService::new("engine-secret", Duration::from_secs(3600), sessions.clone(), clock.clone()).unwrap());
        let user = User {
            id: "u-1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            role,
            tenant_id: "acme".to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        let session = sessions.create(&user.id).unwrap();
        let token = tokens.issue(&user, &session.session_id).unwrap().token;
        (PermissionEngine::new(tokens, enabled), token)
    }

    #[test]
    fn test_require_permission() {
        let (engine, token) = engine(true, Role::Developer);

        assert!(engine.require_permission(&token, Permission::CreateWorkflow).is_ok());
        match engine.require_permission(&token, Permission::ManageUsers) {
            Err(GuardError::InsufficientPermission { required }) => assert_eq!(required, Permission::ManageUsers),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_bad_token_looks_like_missing_permission() {
        let (engine, _) = engine(true, Role::Administrator);

        assert!(!engine.has_permission("garbage", Permission::ListWorkflows));
        assert!(matches!(
            engine.require_permission("garbage", Permission::ListWorkflows),
            Err(GuardError::InsufficientPermission { required: Permission::ListWorkflows })
        ));
        assert!(matches!(engine.authorize("garbage", Permission::ListWorkflows), Err(Denial::Unauthenticated(_))));
    }

    #[test]
    fn test_disabled_rbac_still_requires_valid_token() {
        let (engine, token) = engine(false, Role::Guest);

        assert!(engine.has_permission(&token, Permission::SystemAdmin));
        assert!(!engine.has_permission("garbage", Permission::ListWorkflows));
    }
}
