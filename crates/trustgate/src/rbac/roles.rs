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

//! Role and permission definitions and the static role table

use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Closed set of user roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Developer,
    Viewer,
    Guest,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Administrator, Role::Developer, Role::Viewer, Role::Guest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Developer => "developer",
            Role::Viewer => "viewer",
            Role::Guest => "guest",
        }
    }

    pub fn is_administrator(&self) -> bool {
        matches!(self, Role::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| GuardError::validation(format!("Unknown role: {s}")))
    }
}

/// Capability tags checked against a token's claim set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateWorkflow,
    ReadWorkflow,
    UpdateWorkflow,
    DeleteWorkflow,
    ExecuteWorkflow,
    ListWorkflows,
    ViewExecutions,
    ManageTemplates,
    ManageUsers,
    ViewAuditLogs,
    SystemAdmin,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::CreateWorkflow,
        Permission::ReadWorkflow,
        Permission::UpdateWorkflow,
        Permission::DeleteWorkflow,
        Permission::ExecuteWorkflow,
        Permission::ListWorkflows,
        Permission::ViewExecutions,
        Permission::ManageTemplates,
        Permission::ManageUsers,
        Permission::ViewAuditLogs,
        Permission::SystemAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CreateWorkflow => "create_workflow",
            Permission::ReadWorkflow => "read_workflow",
            Permission::UpdateWorkflow => "update_workflow",
            Permission::DeleteWorkflow => "delete_workflow",
            Permission::ExecuteWorkflow => "execute_workflow",
            Permission::ListWorkflows => "list_workflows",
            Permission::ViewExecutions => "view_executions",
            Permission::ManageTemplates => "manage_templates",
            Permission::ManageUsers => "manage_users",
            Permission::ViewAuditLogs => "view_audit_logs",
            Permission::SystemAdmin => "system_admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == s)
            .ok_or_else(|| GuardError::validation(format!("Unknown permission: {s}")))
    }
}

use Permission::*;

const GUEST: &[Permission] = &[ListWorkflows];

const VIEWER: &[Permission] = &[ListWorkflows, ReadWorkflow, ViewExecutions];

const DEVELOPER: &[Permission] = &[
    ListWorkflows,
    ReadWorkflow,
    ViewExecutions,
    CreateWorkflow,
    UpdateWorkflow,
    DeleteWorkflow,
    ExecuteWorkflow,
    ManageTemplates,
];

/// Role table; each row lists the full grant set of one role
const ROLE_TABLE: &[(Role, &[Permission])] = &[
    (Role::Administrator, &Permission::ALL),
    (Role::Developer, DEVELOPER),
    (Role::Viewer, VIEWER),
    (Role::Guest, GUEST),
];

/// Intended privilege ordering, each role a superset of the next
const HIERARCHY: &[Role] = &[Role::Administrator, Role::Developer, Role::Viewer, Role::Guest];

/// Process-wide role→permission table
#[derive(Debug)]
pub struct PermissionTable {
    grants: HashMap<Role, HashSet<Permission>>,
}

static TABLE: LazyLock<PermissionTable> = LazyLock::new(|| PermissionTable {
    grants: ROLE_TABLE.iter().map(|(role, permissions)| (*role, permissions.iter().copied().collect())).collect(),
});

impl PermissionTable {
    /// The shared table, built once on first use
    pub fn global() -> &'static PermissionTable {
        &TABLE
    }

    /// Permissions granted to a role
    pub fn permissions_for(&self, role: Role) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = self.grants.get(&role).map(|set| set.iter().copied().collect()).unwrap_or_default();
        permissions.sort();
        permissions
    }

    pub fn grants(&self, role: Role, permission: Permission) -> bool {
        self.grants.get(&role).is_some_and(|set| set.contains(&permission))
    }

    /// Check that every role grants at least what the roles below it grant
    pub fn verify_hierarchy(&self) -> GuardResult<()> {
        for role in Role::ALL {
            if !self.grants.contains_key(&role) {
                return Err(GuardError::configuration(format!("Role {role} has no permission entry")));
            }
        }

        for pair in HIERARCHY.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            let upper_set = &self.grants[&upper];
            if let Some(missing) = self.grants[&lower].iter().find(|permission| !upper_set.contains(permission)) {
                return Err(GuardError::configuration(format!("Role {upper} is missing {missing} granted to {lower}")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_administrator_has_everything() {
        let table = PermissionTable::global();
        for permission in Permission::ALL {
            assert!(table.grants(Role::Administrator, permission), "administrator lacks {permission}");
        }
    }

    #[test]
    fn test_subset_roles_are_closed_under_administrator() {
        let table = PermissionTable::global();
        for role in Role::ALL {
            for permission in table.permissions_for(role) {
                assert!(table.grants(Role::Administrator, permission));
            }
        }
        table.verify_hierarchy().unwrap();
    }

    #[test]
    fn test_developer_grants() {
        let table = PermissionTable::global();
        assert!(table.grants(Role::Developer, Permission::CreateWorkflow));
        assert!(!table.grants(Role::Developer, Permission::ManageUsers));
        assert!(!table.grants(Role::Viewer, Permission::UpdateWorkflow));
        assert_eq!(table.permissions_for(Role::Guest), vec![Permission::ListWorkflows]);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("manage_users".parse::<Permission>().unwrap(), Permission::ManageUsers);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&Permission::ViewAuditLogs).unwrap();
        assert_eq!(json, "\"view_audit_logs\"");
        let role: Role = serde_json::from_str("\"developer\"").unwrap();
        assert_eq!(role, Role::Developer);
    }
}
