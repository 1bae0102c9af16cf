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

//! In-memory user directory

use crate::clock::SharedClock;
use crate::crypto;
use crate::error::{GuardError, GuardResult};
use crate::rbac::Role;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// User account
///
/// Only `is_active` and `role` change after provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub tenant_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Provisioning request
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub tenant_id: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>, role: Role, tenant_id: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            email: format!("{username}@localhost"),
            username,
            password: password.into(),
            role,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }
}

/// User directory keyed by id, with a username index
#[derive(Debug)]
pub struct UserStore {
    users: DashMap<String, User>,
    by_username: DashMap<String, String>,
    clock: SharedClock,
}

impl UserStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            users: DashMap::new(),
            by_username: DashMap::new(),
            clock,
        }
    }

    /// Provision an account, hashing the password with Argon2id
    pub fn provision(&self, request: NewUser) -> GuardResult<User> {
        if request.password.is_empty() {
            return Err(GuardError::validation("password must not be empty"));
        }
        let hash = crypto::hash_password(&request.password)?;
        self.provision_with_hash(request.username, request.email, hash, request.role, request.tenant_id)
    }

    /// Provision an account from an existing PHC hash
    pub fn provision_with_hash(&self, username: String, email: String, password_hash: String, role: Role, tenant_id: String) -> GuardResult<User> {
        if username.trim().is_empty() {
            return Err(GuardError::validation("username must not be empty"));
        }
        if tenant_id.trim().is_empty() {
            return Err(GuardError::validation("tenant id must not be empty"));
        }
        crypto::check_password_hash(&password_hash)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.clone(),
            email,
            password_hash,
            role,
            tenant_id,
            is_active: true,
            created_at: self.clock.now(),
        };

        match self.by_username.entry(username) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(GuardError::validation("username already exists")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.id.clone());
            }
        }
        self.users.insert(user.id.clone(), user.clone());

        info!(user_id = %user.id, username = %user.username, role = %user.role, tenant_id = %user.tenant_id, "User provisioned");
        Ok(user)
    }

    pub fn get(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|user| user.clone())
    }

    pub fn find_by_username(&self, username: &str) -> Option<User> {
        let id = self.by_username.get(username)?.clone();
        self.get(&id)
    }

    pub fn set_active(&self, user_id: &str, active: bool) -> GuardResult<User> {
        let mut user = self.users.get_mut(user_id).ok_or_else(|| GuardError::NotFound {
            message: "User not found".to_string(),
        })?;
        user.is_active = active;
        Ok(user.clone())
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> GuardResult<User> {
        let mut user = self.users.get_mut(user_id).ok_or_else(|| GuardError::NotFound {
            message: "User not found".to_string(),
        })?;
        user.role = role;
        Ok(user.clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
