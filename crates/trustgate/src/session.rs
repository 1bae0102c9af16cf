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

//! Server-side sessions with sliding expiry

use crate::clock::{SharedClock, to_chrono};
use crate::crypto;
use crate::error::{GuardError, GuardResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Session record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Session store keyed by opaque session id
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    timeout: Duration,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(timeout: std::time::Duration, clock: SharedClock) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout: to_chrono(timeout),
            clock,
        }
    }

    /// Allocate a session for a user
    ///
    /// The id embeds the user id and creation time ahead of 16 random bytes,
    /// so it is unguessable yet still readable in audit output.
    pub fn create(&self, user_id: &str) -> GuardResult<Session> {
        if user_id.is_empty() {
            return Err(GuardError::validation("user id must not be empty"));
        }

        let now = self.clock.now();
        let session = Session {
            session_id: format!("sess_{}_{}_{}", user_id, now.timestamp_millis(), crypto::random_token(16)?),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + self.timeout,
        };

        self.sessions.insert(session.session_id.clone(), session.clone());
        debug!(user_id = %user_id, session_id = %session.session_id, "Session created");
        Ok(session)
    }

    /// Extend a live session; returns the refreshed record
    ///
    /// A lapsed session is removed instead of revived.
    pub fn touch(&self, session_id: &str) -> Option<Session> {
        self.slide(session_id, None)
    }

    /// Like [`Self::touch`], but only slides a session owned by `user_id`
    ///
    /// A session held by another user is left untouched.
    pub fn touch_owned(&self, session_id: &str, user_id: &str) -> Option<Session> {
        self.slide(session_id, Some(user_id))
    }

    fn slide(&self, session_id: &str, owner: Option<&str>) -> Option<Session> {
        let now = self.clock.now();
        let mut entry = self.sessions.get_mut(session_id)?;
        if owner.is_some_and(|owner| entry.user_id != owner) {
            return None;
        }
        if !entry.is_live_at(now) {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }

        entry.last_activity = now;
        entry.expires_at = now + self.timeout;
        Some(entry.clone())
    }

    /// Remove a session; absent sessions are not an error
    pub fn invalidate(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Remove every session belonging to a user
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.user_id != user_id);
        before.saturating_sub(self.sessions.len())
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        let now = self.clock.now();
        self.sessions.get(session_id).is_some_and(|session| session.is_live_at(now))
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|session| session.clone())
    }

    /// Drop every lapsed session
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_live_at(now));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "Purged expired sessions");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
