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

use chrono::Duration;
use std::sync::Arc;
use trustgate::audit::{AuditAction, AuditQuery};
use trustgate::clock::ManualClock;
use trustgate::config::Config;
use trustgate::rbac::Role;
use trustgate::resource_indicator::{Capability, IndicatorFailure, ResourceIndicatorService};
use trustgate::users::NewUser;
use trustgate::{GuardError, TrustGate};

struct Fixture {
    gate: TrustGate,
    clock: Arc<ManualClock>,
    developer: String,
    viewer: String,
    outsider: String,
    admin: String,
}

fn fixture(enable_resource_indicators: bool) -> Fixture {
    let clock = Arc::new(ManualClock::starting_now());
    let gate = TrustGate::with_clock(
        Config {
            jwt_secret: Some("indicator-tests".to_string()),
            resource_indicator_secret: Some("indicator-hmac".to_string()),
            enable_resource_indicators,
            ..Config::default()
        },
        clock.clone(),
    )
    .unwrap();

    gate.provision_user(NewUser::new("dev", "pw", Role::Developer, "acme")).unwrap();
    gate.provision_user(NewUser::new("view", "pw", Role::Viewer, "acme")).unwrap();
    gate.provision_user(NewUser::new("other", "pw", Role::Developer, "globex")).unwrap();
    gate.provision_user(NewUser::new("root", "pw", Role::Administrator, "globex")).unwrap();

    let login = |name: &str| gate.authenticate(name, "pw").unwrap().token;
    let (developer, viewer, outsider, admin) = (login("dev"), login("view"), login("other"), login("root"));

    Fixture {
        gate,
        clock,
        developer,
        viewer,
        outsider,
        admin,
    }
}

#[test]
fn test_public_indicator_scenario() {
    let f = fixture(true);
    let record = f.gate.generate_resource_indicator("workflow", "wf-1", None).unwrap();
    assert!(record.is_public());

    let anonymous = f.gate.validate_resource_indicator(&record.indicator, None);
    assert!(anonymous.valid);
    assert!(anonymous.permissions.is_empty());

    let developer = f.gate.validate_resource_indicator(&record.indicator, Some(&f.developer));
    assert!(developer.valid);
    assert_eq!(
        developer.permissions,
        vec![Capability::Read, Capability::Create, Capability::Update, Capability::Delete, Capability::Execute]
    );

    let viewer = f.gate.validate_resource_indicator(&record.indicator, Some(&f.viewer));
    assert_eq!(viewer.permissions, vec![Capability::Read]);
}

#[test]
fn test_scoped_indicator_scenario() {
    let f = fixture(true);
    let record = f.gate.generate_resource_indicator("workflow", "wf-2", Some(&f.developer)).unwrap();
    assert_eq!(record.audience, "acme:developer");

    let anonymous = f.gate.validate_resource_indicator(&record.indicator, None);
    assert!(!anonymous.valid);
    assert_eq!(anonymous.reason, Some(IndicatorFailure::AuthenticationRequired));

    // Same tenant but a different role is a different audience.
    let viewer = f.gate.validate_resource_indicator(&record.indicator, Some(&f.viewer));
    assert_eq!(viewer.reason, Some(IndicatorFailure::InsufficientPermissions));

    let outsider = f.gate.validate_resource_indicator(&record.indicator, Some(&f.outsider));
    assert_eq!(outsider.reason, Some(IndicatorFailure::InsufficientPermissions));

    let admin = f.gate.validate_resource_indicator(&record.indicator, Some(&f.admin));
    assert!(admin.valid);

    let owner = f.gate.validate_resource_indicator(&record.indicator, Some(&f.developer));
    assert!(owner.valid);
    assert!(owner.permissions.contains(&Capability::Execute));
}

#[test]
fn test_unknown_and_expired_indicators() {
    let f = fixture(true);
    let missing = f.gate.validate_resource_indicator("00000000-0000-0000-0000-000000000000", Some(&f.admin));
    assert_eq!(missing.reason, Some(IndicatorFailure::NotFound));
    match missing.into_result() {
        Err(GuardError::ResourceIndicatorInvalid { reason }) => assert_eq!(reason, IndicatorFailure::NotFound),
        other => panic!("unexpected result: {other:?}"),
    }

    let record = f.gate.generate_resource_indicator("execution", "run-9", None).unwrap();
    f.clock.advance(Duration::hours(24));
    assert!(f.gate.validate_resource_indicator(&record.indicator, None).valid);
    f.clock.advance(Duration::seconds(1));
    assert_eq!(
        f.gate.validate_resource_indicator(&record.indicator, None).reason,
        Some(IndicatorFailure::Expired)
    );
}

#[test]
fn test_invalid_token_is_treated_as_absent() {
    let f = fixture(true);
    let record = f.gate.generate_resource_indicator("template", "tpl-1", Some("garbage")).unwrap();
    assert!(record.is_public());

    let scoped = f.gate.generate_resource_indicator("template", "tpl-2", Some(&f.developer)).unwrap();
    let result = f.gate.validate_resource_indicator(&scoped.indicator, Some("garbage"));
    assert_eq!(result.reason, Some(IndicatorFailure::AuthenticationRequired));

    let failures = f.gate.audit_log().query(&AuditQuery::default().action(AuditAction::TokenValidationFailed));
    assert_eq!(failures.len(), 2);
}

#[test]
fn test_regeneration_is_deterministic_and_audited() {
    let f = fixture(true);
    let first = f.gate.generate_resource_indicator("workflow", "wf-7", None).unwrap();
    let second = f.gate.generate_resource_indicator("workflow", "wf-7", Some(&f.developer)).unwrap();

    assert_eq!(first.indicator, second.indicator);
    assert_eq!(first.indicator, ResourceIndicatorService::derive_indicator("workflow", "wf-7"));
    assert_ne!(first.nonce, second.nonce);

    // The latest record wins, so the indicator is now scoped.
    assert_eq!(
        f.gate.validate_resource_indicator(&first.indicator, None).reason,
        Some(IndicatorFailure::AuthenticationRequired)
    );

    let generated = f.gate.audit_log().query(&AuditQuery::default().action(AuditAction::ResourceIndicatorGenerated));
    assert_eq!(generated.len(), 2);
    assert_eq!(generated[0].tenant_id.as_deref(), Some("acme"));
    assert_eq!(generated[1].user_id, None);
}

#[test]
fn test_malformed_resource_types_rejected() {
    let f = fixture(true);
    for resource_type in ["", "Workflow", "work/flow", "wf type"] {
        assert!(matches!(
            f.gate.generate_resource_indicator(resource_type, "x", None),
            Err(GuardError::Validation { .. })
        ));
    }
    assert!(f.gate.generate_resource_indicator("workflow", "", None).is_err());
}

#[test]
fn test_disabled_indicators_accept_everything() {
    let f = fixture(false);
    let unknown = f.gate.validate_resource_indicator("not-an-indicator", Some(&f.developer));
    assert!(unknown.valid);
    assert!(unknown.permissions.is_empty());

    let record = f.gate.generate_resource_indicator("workflow", "wf-3", Some(&f.developer)).unwrap();
    let outsider = f.gate.validate_resource_indicator(&record.indicator, Some(&f.outsider));
    assert!(outsider.valid);
    assert!(outsider.permissions.contains(&Capability::Create));
}
