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

//! Signed, audience-scoped resource indicators
//!
//! An indicator binds a `(resource type, resource id)` pair to the context it
//! was issued in. The indicator string itself is a name-based UUID, so the
//! same pair always maps to the same string; the stored record carries a
//! fresh nonce, timestamp and HMAC signature on every issuance.

use crate::audit::{AuditAction, AuditEvent, AuditLog};
use crate::clock::SharedClock;
use crate::crypto::{self, HmacSigner};
use crate::error::{GuardError, GuardResult};
use crate::rbac::Permission;
use crate::token::Claims;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::{Uuid, uuid};

/// Namespace for name-based indicator derivation
pub const INDICATOR_NAMESPACE: Uuid = uuid!("6f1c8f0e-2b7a-5d4e-9a63-0c7e4b1d2f58");

/// Audience of indicators issued without a token
pub const PUBLIC_AUDIENCE: &str = "public";

pub const INDICATOR_VERSION: &str = "1";

/// Lifetime of an indicator from its issuance timestamp
pub fn indicator_ttl() -> Duration {
    Duration::hours(24)
}

/// Why an indicator was rejected; each reason is safe to disclose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorFailure {
    #[serde(rename = "not found")]
    NotFound,
    #[serde(rename = "tampered")]
    Tampered,
    #[serde(rename = "expired")]
    Expired,
    #[serde(rename = "insufficient permissions")]
    InsufficientPermissions,
    #[serde(rename = "authentication required")]
    AuthenticationRequired,
}

impl IndicatorFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorFailure::NotFound => "not found",
            IndicatorFailure::Tampered => "tampered",
            IndicatorFailure::Expired => "expired",
            IndicatorFailure::InsufficientPermissions => "insufficient permissions",
            IndicatorFailure::AuthenticationRequired => "authentication required",
        }
    }
}

impl fmt::Display for IndicatorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations a holder may perform on the referenced resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Create,
    Update,
    Delete,
    Execute,
}

use Capability::*;

/// Permission→capability map per resource type
const CAPABILITY_MAP: &[(&str, &[(Permission, &[Capability])])] = &[
    (
        "workflow",
        &[
            (Permission::ReadWorkflow, &[Read]),
            (Permission::ListWorkflows, &[Read]),
            (Permission::CreateWorkflow, &[Read, Create]),
            (Permission::UpdateWorkflow, &[Read, Update]),
            (Permission::DeleteWorkflow, &[Read, Delete]),
            (Permission::ExecuteWorkflow, &[Read, Execute]),
        ],
    ),
    (
        "execution",
        &[
            (Permission::ViewExecutions, &[Read]),
            (Permission::ExecuteWorkflow, &[Read, Create]),
            (Permission::DeleteWorkflow, &[Delete]),
        ],
    ),
    (
        "template",
        &[
            (Permission::ListWorkflows, &[Read]),
            (Permission::ManageTemplates, &[Read, Create, Update, Delete]),
        ],
    ),
    (
        "audit_log",
        &[(Permission::ViewAuditLogs, &[Read])],
    ),
];

/// Capabilities a permission set yields for a resource type
pub fn capabilities_for(resource_type: &str, permissions: &[Permission]) -> Vec<Capability> {
    let Some((_, grants)) = CAPABILITY_MAP.iter().find(|(kind, _)| *kind == resource_type) else {
        return Vec::new();
    };

    let capabilities: BTreeSet<Capability> = grants
        .iter()
        .filter(|(permission, _)| permissions.contains(permission))
        .flat_map(|(_, capabilities)| capabilities.iter().copied())
        .collect();
    capabilities.into_iter().collect()
}

/// Stored indicator record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceIndicator {
    pub indicator: String,
    pub resource_type: String,
    pub resource_id: String,
    pub audience: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    pub server_id: String,
    pub version: String,
    pub signature: String,
}

impl ResourceIndicator {
    pub fn is_public(&self) -> bool {
        self.audience == PUBLIC_AUDIENCE
    }

    /// Byte encoding covered by the signature
    ///
    /// Fields appear in declaration order, each as `<byte length>:<bytes>;`,
    /// with the timestamp as fixed-width milliseconds since the epoch plus
    /// the fixed-width nanoseconds below the millisecond.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let timestamp = format!(
            "{:020}.{:06}",
            self.timestamp.timestamp_millis(),
            self.timestamp.timestamp_subsec_nanos() % 1_000_000
        );
        let fields: [&str; 8] = [
            &self.indicator,
            &self.resource_type,
            &self.resource_id,
            &self.audience,
            &timestamp,
            &self.nonce,
            &self.server_id,
            &self.version,
        ];

        let mut out = Vec::with_capacity(fields.iter().map(|field| field.len() + 8).sum());
        for field in fields {
            out.extend_from_slice(field.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(field.as_bytes());
            out.push(b';');
        }
        out
    }
}

/// Result of validating an indicator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorValidation {
    pub valid: bool,
    pub permissions: Vec<Capability>,
    pub reason: Option<IndicatorFailure>,
}

impl IndicatorValidation {
    fn granted(permissions: Vec<Capability>) -> Self {
        Self {
            valid: true,
            permissions,
            reason: None,
        }
    }

    fn rejected(reason: IndicatorFailure) -> Self {
        Self {
            valid: false,
            permissions: Vec::new(),
            reason: Some(reason),
        }
    }

    /// Convert a rejection into `ResourceIndicatorInvalid`
    pub fn into_result(self) -> GuardResult<Vec<Capability>> {
        match self.reason {
            Some(reason) if !self.valid => Err(GuardError::ResourceIndicatorInvalid { reason }),
            _ => Ok(self.permissions),
        }
    }
}

/// Issues and validates resource indicators
#[derive(Debug)]
pub struct ResourceIndicatorService {
    indicators: DashMap<String, ResourceIndicator>,
    signer: HmacSigner,
    server_id: String,
    enabled: bool,
    audit: Arc<AuditLog>,
    clock: SharedClock,
}

impl ResourceIndicatorService {
    pub fn new(secret: &str, server_id: impl Into<String>, enabled: bool, audit: Arc<AuditLog>, clock: SharedClock) -> GuardResult<Self> {
        Ok(Self {
            indicators: DashMap::new(),
            signer: HmacSigner::new(secret.as_bytes())?,
            server_id: server_id.into(),
            enabled,
            audit,
            clock,
        })
    }

    /// Deterministic indicator string for a resource
    pub fn derive_indicator(resource_type: &str, resource_id: &str) -> String {
        // Resource types cannot contain '/', so the name is unambiguous.
        Uuid::new_v5(&INDICATOR_NAMESPACE, format!("{resource_type}/{resource_id}").as_bytes()).to_string()
    }

    /// Issue and store an indicator; `claims` must already be verified
    pub fn generate(&self, resource_type: &str, resource_id: &str, claims: Option<&Claims>) -> GuardResult<ResourceIndicator> {
        validate_resource_type(resource_type)?;
        if resource_id.trim().is_empty() {
            return Err(GuardError::validation("resource id must not be empty"));
        }

        let mut record = ResourceIndicator {
            indicator: Self::derive_indicator(resource_type, resource_id),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            audience: claims.map(Claims::audience_scope).unwrap_or_else(|| PUBLIC_AUDIENCE.to_string()),
            timestamp: self.clock.now().trunc_subsecs(3),
            nonce: crypto::random_token(16)?,
            server_id: self.server_id.clone(),
            version: INDICATOR_VERSION.to_string(),
            signature: String::new(),
        };
        record.signature = self.signer.sign(&record.canonical_bytes());

        self.indicators.insert(record.indicator.clone(), record.clone());

        let mut event = AuditEvent::new(AuditAction::ResourceIndicatorGenerated)
            .with_source("resource_indicator")
            .with_detail("indicator", record.indicator.clone())
            .with_detail("resource_type", record.resource_type.clone())
            .with_detail("resource_id", record.resource_id.clone())
            .with_detail("audience", record.audience.clone());
        if let Some(claims) = claims {
            event = event.with_user(claims.user_id.clone()).with_tenant(claims.tenant_id.clone());
        }
        self.audit.append(event);

        info!(indicator = %record.indicator, resource_type = %resource_type, audience = %record.audience, "Resource indicator generated");
        Ok(record)
    }

    /// Check an indicator against its stored record and the caller
    ///
    /// Reasons are checked in order: not found, tampered, expired, then
    /// audience. `claims` must already be verified.
    pub fn validate(&self, indicator: &str, claims: Option<&Claims>) -> IndicatorValidation {
        let record = self.indicators.get(indicator).map(|record| record.clone());

        if !self.enabled {
            let permissions = match (&record, claims) {
                (Some(record), Some(claims)) => capabilities_for(&record.resource_type, &claims.permissions),
                _ => Vec::new(),
            };
            return IndicatorValidation::granted(permissions);
        }

        let Some(record) = record else {
            return self.reject(indicator, IndicatorFailure::NotFound);
        };

        if !self.signer.verify(&record.canonical_bytes(), &record.signature) {
            return self.reject(indicator, IndicatorFailure::Tampered);
        }

        if self.clock.now() - record.timestamp > indicator_ttl() {
            return self.reject(indicator, IndicatorFailure::Expired);
        }

        if !record.is_public() {
            match claims {
                None => return self.reject(indicator, IndicatorFailure::AuthenticationRequired),
                Some(claims) if !claims.role.is_administrator() && claims.audience_scope() != record.audience => {
                    return self.reject(indicator, IndicatorFailure::InsufficientPermissions);
                }
                Some(_) => {}
            }
        }

        let permissions = claims.map(|claims| capabilities_for(&record.resource_type, &claims.permissions)).unwrap_or_default();
        debug!(indicator = %indicator, capabilities = ?permissions, "Resource indicator accepted");
        IndicatorValidation::granted(permissions)
    }

    fn reject(&self, indicator: &str, reason: IndicatorFailure) -> IndicatorValidation {
        warn!(indicator = %indicator, reason = %reason, "Resource indicator rejected");
        IndicatorValidation::rejected(reason)
    }

    pub fn get(&self, indicator: &str) -> Option<ResourceIndicator> {
        self.indicators.get(indicator).map(|record| record.clone())
    }

    /// Drop records past their lifetime
    pub fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now() - indicator_ttl();
        let before = self.indicators.len();
        self.indicators.retain(|_, record| record.timestamp >= cutoff);
        before.saturating_sub(self.indicators.len())
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

fn validate_resource_type(resource_type: &str) -> GuardResult<()> {
    if resource_type.is_empty() {
        return Err(GuardError::validation("resource type must not be empty"));
    }
    if !resource_type.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(GuardError::validation(format!("invalid resource type: {resource_type}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::rbac::{PermissionTable, Role};

    fn service() -> (ResourceIndicatorService, Arc<ManualClock>, Arc<AuditLog>) {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let service = ResourceIndicatorService::new("indicator-secret", "node-1", true, audit.clone(), clock.clone()).unwrap();
        (service, clock, audit)
    }

    fn claims(role: Role, tenant: &str) -> Claims {
        Claims {
            sub: "u-1".to_string(),
            iss: "trustgate".to_string(),
            aud: "workflow-api".to_string(),
            exp: i64::MAX,
            iat: 0,
            user_id: "u-1".to_string(),
            username: "alice".to_string(),
            role,
            tenant_id: tenant.to_string(),
            session_id: "s-1".to_string(),
            permissions: PermissionTable::global().permissions_for(role),
        }
    }

    #[test]
    fn test_indicator_is_deterministic() {
        let (service, clock, _) = service();
        let first = service.generate("workflow", "wf-42", None).unwrap();
        clock.advance(Duration::seconds(5));
        let second = service.generate("workflow", "wf-42", None).unwrap();

        assert_eq!(first.indicator, second.indicator);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.timestamp, second.timestamp);
        assert_ne!(first.signature, second.signature);
        assert_ne!(first.indicator, ResourceIndicatorService::derive_indicator("workflow", "wf-43"));
    }

    #[test]
    fn test_generate_audits_once() {
        let (service, _, audit) = service();
        service.generate("workflow", "wf-42", Some(&claims(Role::Developer, "acme"))).unwrap();

        let entries = audit.query(&Default::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ResourceIndicatorGenerated);
        assert_eq!(entries[0].tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_public_indicator() {
        let (service, _, _) = service();
        let record = service.generate("workflow", "wf-42", None).unwrap();
        assert_eq!(record.audience, PUBLIC_AUDIENCE);

        let result = service.validate(&record.indicator, None);
        assert!(result.valid);
        assert!(result.permissions.is_empty());

        let result = service.validate(&record.indicator, Some(&claims(Role::Developer, "acme")));
        assert!(result.valid);
        assert_eq!(result.permissions, vec![Read, Create, Update, Delete, Execute]);
    }

    #[test]
    fn test_scoped_indicator_audience() {
        let (service, _, _) = service();
        let record = service.generate("workflow", "wf-42", Some(&claims(Role::Developer, "acme"))).unwrap();
        assert_eq!(record.audience, "acme:developer");

        assert_eq!(service.validate(&record.indicator, None).reason, Some(IndicatorFailure::AuthenticationRequired));
        assert_eq!(
            service.validate(&record.indicator, Some(&claims(Role::Viewer, "acme"))).reason,
            Some(IndicatorFailure::InsufficientPermissions)
        );
        assert_eq!(
            service.validate(&record.indicator, Some(&claims(Role::Developer, "globex"))).reason,
            Some(IndicatorFailure::InsufficientPermissions)
        );

        let same = service.validate(&record.indicator, Some(&claims(Role::Developer, "acme")));
        assert!(same.valid);

        let admin = service.validate(&record.indicator, Some(&claims(Role::Administrator, "globex")));
        assert!(admin.valid);
    }

    #[test]
    fn test_capabilities_follow_permissions() {
        let (service, _, _) = service();
        let record = service.generate("workflow", "wf-1", None).unwrap();

        let viewer = service.validate(&record.indicator, Some(&claims(Role::Viewer, "acme")));
        assert_eq!(viewer.permissions, vec![Read]);
        assert_eq!(capabilities_for("workflow", &[Permission::UpdateWorkflow]), vec![Read, Update]);
        assert!(capabilities_for("unknown", &Permission::ALL).is_empty());
    }

    #[test]
    fn test_not_found_and_expired() {
        let (service, clock, _) = service();
        assert_eq!(service.validate("nope", None).reason, Some(IndicatorFailure::NotFound));

        let record = service.generate("workflow", "wf-42", None).unwrap();
        clock.advance(Duration::hours(24));
        assert!(service.validate(&record.indicator, None).valid);

        clock.advance(Duration::milliseconds(1));
        let result = service.validate(&record.indicator, None);
        assert_eq!(result.reason, Some(IndicatorFailure::Expired));
        assert!(matches!(result.into_result(), Err(GuardError::ResourceIndicatorInvalid { reason: IndicatorFailure::Expired })));

        assert_eq!(service.purge_expired(), 1);
        assert!(service.is_empty());
    }

    #[test]
    fn test_any_field_mutation_is_tampering() {
        let (service, _, _) = service();
        let original = service.generate("workflow", "wf-42", Some(&claims(Role::Developer, "acme"))).unwrap();

        let mutations: Vec<Box<dyn Fn(&mut ResourceIndicator)>> = vec![
            Box::new(|r| r.resource_type = "template".to_string()),
            Box::new(|r| r.resource_id = "wf-43".to_string()),
            Box::new(|r| r.audience = PUBLIC_AUDIENCE.to_string()),
            Box::new(|r| r.indicator = ResourceIndicatorService::derive_indicator("workflow", "wf-43")),
            Box::new(|r| r.timestamp += Duration::milliseconds(1)),
            Box::new(|r| r.timestamp += Duration::microseconds(1)),
            Box::new(|r| r.timestamp += Duration::nanoseconds(999_999)),
            Box::new(|r| r.nonce.push('x')),
            Box::new(|r| r.server_id = "node-2".to_string()),
            Box::new(|r| r.version = "2".to_string()),
            Box::new(|r| r.signature = r.signature.chars().rev().collect()),
        ];

        for mutate in mutations {
            let mut record = original.clone();
            mutate(&mut record);
            service.indicators.insert(original.indicator.clone(), record);

            let result = service.validate(&original.indicator, Some(&claims(Role::Developer, "acme")));
            assert!(!result.valid);
            assert_eq!(result.reason, Some(IndicatorFailure::Tampered));
        }
    }

    #[test]
    fn test_stored_timestamp_is_the_signed_value() {
        let (service, clock, _) = service();
        clock.set(clock.now().trunc_subsecs(3) + Duration::microseconds(1_234));
        let record = service.generate("workflow", "wf-42", None).unwrap();

        assert_eq!(record.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(service.validate(&record.indicator, None).valid);

        let mut shifted = record.clone();
        shifted.timestamp += Duration::microseconds(999);
        assert_eq!(shifted.timestamp.timestamp_millis(), record.timestamp.timestamp_millis());
        service.indicators.insert(record.indicator.clone(), shifted);

        let result = service.validate(&record.indicator, None);
        assert!(!result.valid);
        assert_eq!(result.reason, Some(IndicatorFailure::Tampered));
    }

    #[test]
    fn test_disabled_bypasses_checks() {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(AuditLog::new(clock.clone()));
        let service = ResourceIndicatorService::new("indicator-secret", "node-1", false, audit, clock).unwrap();

        let result = service.validate("anything", None);
        assert!(result.valid);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_input_validation() {
        let (service, _, audit) = service();
        assert!(matches!(service.generate("", "wf-1", None), Err(GuardError::Validation { .. })));
        assert!(matches!(service.generate("workflow", " ", None), Err(GuardError::Validation { .. })));
        assert!(matches!(service.generate("work/flow", "wf-1", None), Err(GuardError::Validation { .. })));
        assert!(service.is_empty());
        assert!(audit.is_empty());
    }

    #[test]
    fn test_canonical_encoding_is_unambiguous() {
        let (service, _, _) = service();
        let record = service.generate("workflow", "wf-42", None).unwrap();

        let mut shifted = record.clone();
        shifted.resource_type = "workflowwf".to_string();
        shifted.resource_id = "-42".to_string();
        assert_ne!(record.canonical_bytes(), shifted.canonical_bytes());
    }
}
