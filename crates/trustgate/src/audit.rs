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

//! Append-only audit trail

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{info, warn};

/// Entries kept before the oldest are dropped
pub const AUDIT_LOG_CAPACITY: usize = 10_000;

/// Default number of entries returned by a query
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Free-form entry metadata
pub type Metadata = HashMap<String, serde_json::Value>;

/// Audit actions written by the core; dispatchers may add their own
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    Logout,
    TokenValidationFailed,
    PermissionDenied,
    ResourceIndicatorGenerated,
    ErrorBoundaryTriggered,
    UserUpdated,
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::Logout => "LOGOUT",
            AuditAction::TokenValidationFailed => "TOKEN_VALIDATION_FAILED",
            AuditAction::PermissionDenied => "PERMISSION_DENIED",
            AuditAction::ResourceIndicatorGenerated => "RESOURCE_INDICATOR_GENERATED",
            AuditAction::ErrorBoundaryTriggered => "ERROR_BOUNDARY_TRIGGERED",
            AuditAction::UserUpdated => "USER_UPDATED",
            AuditAction::Custom(action) => action,
        }
    }

    /// Actions that record a denial or failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditAction::LoginFailed | AuditAction::TokenValidationFailed | AuditAction::PermissionDenied | AuditAction::ErrorBoundaryTriggered
        )
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "LOGIN_SUCCESS" => AuditAction::LoginSuccess,
            "LOGIN_FAILED" => AuditAction::LoginFailed,
            "LOGOUT" => AuditAction::Logout,
            "TOKEN_VALIDATION_FAILED" => AuditAction::TokenValidationFailed,
            "PERMISSION_DENIED" => AuditAction::PermissionDenied,
            "RESOURCE_INDICATOR_GENERATED" => AuditAction::ResourceIndicatorGenerated,
            "ERROR_BOUNDARY_TRIGGERED" => AuditAction::ErrorBoundaryTriggered,
            "USER_UPDATED" => AuditAction::UserUpdated,
            _ => AuditAction::Custom(value),
        }
    }
}

impl From<&str> for AuditAction {
    fn from(value: &str) -> Self {
        AuditAction::from(value.to_string())
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event to be appended; id and timestamp are stamped by the log
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub metadata: Metadata,
    pub source: String,
}

impl AuditEvent {
    pub fn new(action: impl Into<AuditAction>) -> Self {
        Self {
            action: action.into(),
            user_id: None,
            tenant_id: None,
            metadata: Metadata::new(),
            source: "dispatcher".to_string(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Add detail
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// Stored, write-once audit entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub metadata: Metadata,
    pub source: String,
}

/// Query filters; every supplied filter must match
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            action: None,
            user_id: None,
            tenant_id: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl AuditQuery {
    pub fn action(mut self, action: impl Into<AuditAction>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.as_ref().is_none_or(|action| &entry.action == action)
            && self.user_id.as_ref().is_none_or(|user_id| entry.user_id.as_ref() == Some(user_id))
            && self.tenant_id.as_ref().is_none_or(|tenant_id| entry.tenant_id.as_ref() == Some(tenant_id))
    }
}

/// Bounded FIFO audit log
///
/// Tenant-agnostic: callers restrict queries to a tenant themselves.
#[derive(Debug)]
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
    enabled: bool,
    clock: SharedClock,
}

impl AuditLog {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_capacity(AUDIT_LOG_CAPACITY, clock)
    }

    pub fn with_capacity(capacity: usize, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            enabled: true,
            clock,
        }
    }

    /// A log that accepts appends but stores nothing
    pub fn disabled(clock: SharedClock) -> Self {
        Self {
            enabled: false,
            ..Self::new(clock)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append an event, evicting the oldest entries past capacity
    pub fn append(&self, event: AuditEvent) -> Option<AuditEntry> {
        if !self.enabled {
            return None;
        }

        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            action: event.action,
            user_id: event.user_id,
            tenant_id: event.tenant_id,
            metadata: event.metadata,
            source: event.source,
        };

        if entry.action.is_failure() {
            warn!(
                action = %entry.action,
                user_id = ?entry.user_id,
                tenant_id = ?entry.tenant_id,
                source = %entry.source,
                "Audit event: {}", entry.action
            );
        } else {
            info!(
                action = %entry.action,
                user_id = ?entry.user_id,
                tenant_id = ?entry.tenant_id,
                source = %entry.source,
                "Audit event: {}", entry.action
            );
        }

        let mut entries = self.entries.write();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        Some(entry)
    }

    /// Matching entries, newest first, truncated to `query.limit`
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        let mut matched: Vec<AuditEntry> = entries.iter().rev().filter(|entry| query.matches(entry)).cloned().collect();
        // Stable sort keeps insertion order among equal timestamps.
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit);
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get audit statistics
    pub fn statistics(&self) -> AuditStatistics {
        let entries = self.entries.read();

        let mut stats = AuditStatistics {
            total_events: entries.len(),
            ..Default::default()
        };

        for entry in entries.iter() {
            if entry.action.is_failure() {
                stats.failure_events += 1;
            } else {
                stats.other_events += 1;
            }
            *stats.events_by_action.entry(entry.action.as_str().to_string()).or_insert(0) += 1;
        }

        stats
    }
}

/// Audit statistics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: usize,
    pub failure_events: usize,
    pub other_events: usize,
    pub events_by_action: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_append_stamps_entry() {
        let clock = Arc::new(ManualClock::starting_now());
        let log = AuditLog::new(clock.clone());

        let entry = log
            .append(AuditEvent::new(AuditAction::LoginSuccess).with_user("u-1").with_tenant("acme").with_detail("ip", "10.0.0.1"))
            .unwrap();

        assert_eq!(entry.timestamp, clock.now());
        assert_eq!(entry.action, AuditAction::LoginSuccess);
        assert_eq!(entry.metadata.get("ip"), Some(&serde_json::json!("10.0.0.1")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let log = AuditLog::with_capacity(3, Arc::new(ManualClock::starting_now()));

        for i in 0..5 {
            log.append(AuditEvent::new("WORKFLOW_CREATED").with_detail("seq", i));
        }

        assert_eq!(log.len(), 3);
        let seqs: Vec<i64> = log.query(&AuditQuery::default()).iter().map(|e| e.metadata["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![4, 3, 2]);
    }

    #[test]
    fn test_query_filters_and_order() {
        let clock = Arc::new(ManualClock::starting_now());
        let log = AuditLog::new(clock.clone());

        log.append(AuditEvent::new(AuditAction::LoginSuccess).with_user("u-1").with_tenant("acme"));
        clock.advance(Duration::seconds(1));
        log.append(AuditEvent::new(AuditAction::LoginFailed).with_tenant("acme"));
        clock.advance(Duration::seconds(1));
        log.append(AuditEvent::new(AuditAction::LoginSuccess).with_user("u-2").with_tenant("globex"));
        clock.advance(Duration::seconds(1));
        log.append(AuditEvent::new(AuditAction::LoginSuccess).with_user("u-1").with_tenant("acme"));

        let all = log.query(&AuditQuery::default());
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));

        let u1 = log.query(&AuditQuery::default().user("u-1"));
        assert_eq!(u1.len(), 2);

        let acme_success = log.query(&AuditQuery::default().tenant("acme").action(AuditAction::LoginSuccess));
        assert_eq!(acme_success.len(), 2);

        let limited = log.query(&AuditQuery::default().limit(1));
        assert_eq!(limited[0].user_id.as_deref(), Some("u-1"));
        assert_eq!(limited[0].tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_disabled_log_stores_nothing() {
        let log = AuditLog::disabled(Arc::new(ManualClock::starting_now()));
        assert!(log.append(AuditEvent::new(AuditAction::Logout)).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_action_names_round_trip() {
        assert_eq!(AuditAction::from("LOGIN_SUCCESS"), AuditAction::LoginSuccess);
        assert_eq!(AuditAction::from("WORKFLOW_DELETED"), AuditAction::Custom("WORKFLOW_DELETED".to_string()));
        assert_eq!(serde_json::to_string(&AuditAction::PermissionDenied).unwrap(), "\"PERMISSION_DENIED\"");
    }

    #[test]
    fn test_statistics() {
        let log = AuditLog::new(Arc::new(ManualClock::starting_now()));
        log.append(AuditEvent::new(AuditAction::LoginSuccess));
        log.append(AuditEvent::new(AuditAction::LoginFailed));
        log.append(AuditEvent::new(AuditAction::LoginFailed));

        let stats = log.statistics();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.failure_events, 2);
        assert_eq!(stats.events_by_action.get("LOGIN_FAILED"), Some(&2));
    }
}
