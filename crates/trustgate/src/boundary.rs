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

//! Per-operation error boundaries and the rolling metrics store

use crate::audit::{AuditAction, AuditEvent, AuditLog};
use crate::clock::SharedClock;
use crate::error::{GuardError, GuardResult};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Live boundaries and metrics records kept before the oldest are dropped
pub const BOUNDARY_CAPACITY: usize = 1_000;

/// Resident memory of the current process in bytes, zero if unavailable
pub fn process_memory() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|process| process.memory()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryStatus {
    Active,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundaryRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundaryMetrics {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Memory at open
    pub memory_start: u64,
    /// Memory at close
    pub memory_end: Option<u64>,
    /// Serialized size of the context in bytes
    pub request_size: usize,
}

/// Tracking object for one privileged operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBoundary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub context: serde_json::Value,
    pub errors: Vec<BoundaryRecord>,
    pub warnings: Vec<BoundaryRecord>,
    pub metrics: BoundaryMetrics,
    pub status: BoundaryStatus,
}

/// Compact record published when a boundary closes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub boundary_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: i64,
    pub error_count: usize,
    pub warning_count: usize,
    pub success: bool,
    pub request_size: usize,
    pub memory_delta: i64,
}

/// Aggregate over the rolling metrics store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    pub operations: usize,
    pub failures: usize,
    pub error_rate: f64,
    pub mean_duration_ms: f64,
    pub max_duration_ms: i64,
    pub total_warnings: usize,
}

#[derive(Debug, Default)]
struct BoundaryTable {
    order: VecDeque<String>,
    live: HashMap<String, ErrorBoundary>,
}

/// Owns boundaries and the metrics they publish
#[derive(Debug)]
pub struct MetricsCollector {
    boundaries: Mutex<BoundaryTable>,
    records: Mutex<VecDeque<MetricsRecord>>,
    capacity: usize,
    memory_probe: fn() -> u64,
    audit: Arc<AuditLog>,
    clock: SharedClock,
}

impl MetricsCollector {
    pub fn new(audit: Arc<AuditLog>, clock: SharedClock) -> Self {
        Self::with_probe(BOUNDARY_CAPACITY, process_memory, audit, clock)
    }

    /// Custom capacity and memory sampler
    pub fn with_probe(capacity: usize, memory_probe: fn() -> u64, audit: Arc<AuditLog>, clock: SharedClock) -> Self {
        Self {
            boundaries: Mutex::new(BoundaryTable::default()),
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            memory_probe,
            audit,
            clock,
        }
    }

    /// Open a boundary and return its id
    pub fn open(&self, context: serde_json::Value) -> GuardResult<String> {
        let request_size = serde_json::to_vec(&context)?.len();
        let now = self.clock.now();
        let boundary = ErrorBoundary {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            context,
            errors: Vec::new(),
            warnings: Vec::new(),
            metrics: BoundaryMetrics {
                start_time: now,
                end_time: None,
                duration_ms: None,
                memory_start: (self.memory_probe)(),
                memory_end: None,
                request_size,
            },
            status: BoundaryStatus::Active,
        };
        let id = boundary.id.clone();

        let mut table = self.boundaries.lock();
        table.order.push_back(id.clone());
        table.live.insert(id.clone(), boundary);
        while table.order.len() > self.capacity {
            if let Some(evicted) = table.order.pop_front() {
                table.live.remove(&evicted);
                debug!(boundary_id = %evicted, "Evicted oldest error boundary");
            }
        }

        Ok(id)
    }

    /// Record an error or warning; errors are also audited
    pub fn record(&self, boundary_id: &str, kind: RecordKind, message: impl Into<String>, details: serde_json::Value) -> GuardResult<()> {
        let message = message.into();
        let context = {
            let mut table = self.boundaries.lock();
            let boundary = table.live.get_mut(boundary_id).ok_or_else(|| GuardError::NotFound {
                message: format!("Error boundary {boundary_id} not found"),
            })?;
            if boundary.status != BoundaryStatus::Active {
                return Err(GuardError::validation("error boundary already finalized"));
            }

            let record = BoundaryRecord {
                timestamp: self.clock.now(),
                message: message.clone(),
                details: details.clone(),
            };
            match kind {
                RecordKind::Error => boundary.errors.push(record),
                RecordKind::Warning => boundary.warnings.push(record),
            }
            boundary.context.clone()
        };

        if kind == RecordKind::Error {
            warn!(boundary_id = %boundary_id, error = %message, "Error boundary triggered");
            let mut event = AuditEvent::new(AuditAction::ErrorBoundaryTriggered)
                .with_source("error_boundary")
                .with_detail("boundary_id", boundary_id)
                .with_detail("message", message)
                .with_detail("details", details);
            if let Some(user_id) = context.get("user_id").and_then(|value| value.as_str()) {
                event = event.with_user(user_id);
            }
            if let Some(tenant_id) = context.get("tenant_id").and_then(|value| value.as_str()) {
                event = event.with_tenant(tenant_id);
            }
            self.audit.append(event);
        }

        Ok(())
    }

    /// Seal a boundary and publish its metrics record
    pub fn close(&self, boundary_id: &str, success: bool) -> GuardResult<ErrorBoundary> {
        let now = self.clock.now();
        let memory_end = (self.memory_probe)();

        let boundary = {
            let mut table = self.boundaries.lock();
            let boundary = table.live.get_mut(boundary_id).ok_or_else(|| GuardError::NotFound {
                message: format!("Error boundary {boundary_id} not found"),
            })?;
            if boundary.status != BoundaryStatus::Active {
                return Err(GuardError::validation("error boundary already finalized"));
            }

            let duration_ms = (now - boundary.metrics.start_time).num_milliseconds();
            boundary.metrics.end_time = Some(now);
            boundary.metrics.duration_ms = Some(duration_ms);
            boundary.metrics.memory_end = Some(memory_end);
            boundary.status = if success { BoundaryStatus::Success } else { BoundaryStatus::Failed };
            boundary.clone()
        };

        let record = MetricsRecord {
            boundary_id: boundary.id.clone(),
            timestamp: now,
            duration_ms: boundary.metrics.duration_ms.unwrap_or(0),
            error_count: boundary.errors.len(),
            warning_count: boundary.warnings.len(),
            success,
            request_size: boundary.metrics.request_size,
            memory_delta: memory_end as i64 - boundary.metrics.memory_start as i64,
        };

        histogram!("trustgate_operation_duration_ms", record.duration_ms as f64);
        if success {
            counter!("trustgate_operations_succeeded_total", 1);
        } else {
            counter!("trustgate_operations_failed_total", 1);
        }

        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }

        Ok(boundary)
    }

    pub fn get(&self, boundary_id: &str) -> Option<ErrorBoundary> {
        self.boundaries.lock().live.get(boundary_id).cloned()
    }

    pub fn live_boundaries(&self) -> usize {
        self.boundaries.lock().live.len()
    }

    /// Most recent metrics records, newest first
    pub fn recent(&self, limit: usize) -> Vec<MetricsRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let records = self.records.lock();
        if records.is_empty() {
            return MetricsSummary::default();
        }

        let operations = records.len();
        let failures = records.iter().filter(|record| !record.success).count();
        let total_duration: i64 = records.iter().map(|record| record.duration_ms).sum();

        MetricsSummary {
            operations,
            failures,
            error_rate: failures as f64 / operations as f64,
            mean_duration_ms: total_duration as f64 / operations as f64,
            max_duration_ms: records.iter().map(|record| record.duration_ms).max().unwrap_or(0),
            total_warnings: records.iter().map(|record| record.warning_count).sum(),
        }
    }
}
