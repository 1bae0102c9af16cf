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

//! Authorization facade used by the operation dispatcher
//!
//! Every store is created once here and shared by reference; dropping the
//! gate tears them all down. Nothing is persisted.

use crate::audit::{AuditAction, AuditEntry, AuditEvent, AuditLog, AuditQuery};
use crate::boundary::{ErrorBoundary, MetricsCollector, RecordKind};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::crypto;
use crate::error::{GuardError, GuardResult};
use crate::rate_limiting::{RateLimitDecision, SlidingWindowLimiter};
use crate::rbac::{Denial, Permission, PermissionEngine, PermissionTable, Role};
use crate::resource_indicator::{IndicatorValidation, ResourceIndicator, ResourceIndicatorService};
use crate::session::SessionStore;
use crate::token::{Claims, TokenService};
use crate::users::{NewUser, User, UserStore};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub token: String,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub tenant_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The authorization core
#[derive(Debug)]
pub struct TrustGate {
    config: Config,
    users: UserStore,
    sessions: Arc<SessionStore>,
    tokens: Arc<TokenService>,
    permissions: PermissionEngine,
    indicators: ResourceIndicatorService,
    limiter: SlidingWindowLimiter,
    audit: Arc<AuditLog>,
    boundaries: MetricsCollector,
    clock: SharedClock,
}

impl TrustGate {
    /// Build the core on the system clock
    pub fn new(config: Config) -> GuardResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the core on a caller-supplied clock
    ///
    /// Unset secrets are generated here, so tokens do not survive a restart
    /// unless the operator pins `JWT_SECRET`.
    pub fn with_clock(config: Config, clock: SharedClock) -> GuardResult<Self> {
        config.validate()?;
        PermissionTable::global().verify_hierarchy()?;
        crypto::warm_decoy();

        let jwt_secret = match &config.jwt_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("JWT_SECRET not set, generating an ephemeral signing secret");
                crypto::generate_secret()?
            }
        };
        let indicator_secret = match &config.resource_indicator_secret {
            Some(secret) => secret.clone(),
            None => crypto::generate_secret()?,
        };

        let audit = Arc::new(if config.enable_audit_log {
            AuditLog::new(clock.clone())
        } else {
            AuditLog::disabled(clock.clone())
        });
        let sessions = Arc::new(SessionStore::new(config.session_timeout, clock.clone()));
        let tokens = Arc::new(TokenService::new(&jwt_secret, config.jwt_expires_in, sessions.clone(), clock.clone())?);
        let permissions = PermissionEngine::new(tokens.clone(), config.enable_rbac);
        let indicators = ResourceIndicatorService::new(&indicator_secret, config.server_id.clone(), config.enable_resource_indicators, audit.clone(), clock.clone())?;
        let limiter = SlidingWindowLimiter::new(config.rate_limit_config(), clock.clone());
        let boundaries = MetricsCollector::new(audit.clone(), clock.clone());

        info!(
            rbac = config.enable_rbac,
            audit_log = config.enable_audit_log,
            multi_tenant = config.enable_multi_tenant,
            resource_indicators = config.enable_resource_indicators,
            "Authorization core initialized"
        );

        Ok(Self {
            users: UserStore::new(clock.clone()),
            config,
            sessions,
            tokens,
            permissions,
            indicators,
            limiter,
            audit,
            boundaries,
            clock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn boundaries(&self) -> &MetricsCollector {
        &self.boundaries
    }

    pub fn rate_limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn resource_indicators(&self) -> &ResourceIndicatorService {
        &self.indicators
    }

    /// Provision an account; account creation policy lives with the caller
    pub fn provision_user(&self, request: NewUser) -> GuardResult<User> {
        self.users.provision(request)
    }

    /// Exchange credentials for a session and token
    ///
    /// Unknown users, wrong passwords and disabled accounts all fail the same
    /// way; the real cause only reaches the audit log.
    pub fn authenticate(&self, username: &str, password: &str) -> GuardResult<AuthenticatedSession> {
        if username.is_empty() || password.is_empty() {
            return Err(self.login_failed(username, None, "missing_credentials"));
        }

        let Some(user) = self.users.find_by_username(username) else {
            crypto::verify_decoy(password);
            return Err(self.login_failed(username, None, "unknown_user"));
        };
        match crypto::verify_password(password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => return Err(self.login_failed(username, Some(&user), "bad_password")),
            Err(error) => {
                warn!(user_id = %user.id, error = %error, "Stored password hash could not be verified");
                return Err(self.login_failed(username, Some(&user), "hash_error"));
            }
        }
        if !user.is_active {
            return Err(self.login_failed(username, Some(&user), "inactive"));
        }

        let session = self.sessions.create(&user.id)?;
        let issued = self.tokens.issue(&user, &session.session_id)?;

        self.audit.append(
            AuditEvent::new(AuditAction::LoginSuccess)
                .with_source("auth")
                .with_user(user.id.clone())
                .with_tenant(user.tenant_id.clone())
                .with_detail("username", user.username.clone())
                .with_detail("session_id", session.session_id.clone()),
        );
        counter!("trustgate_logins_total", 1, "outcome" => "success");

        Ok(AuthenticatedSession {
            expires_at: issued.claims.expires_at(),
            token: issued.token,
            session_id: session.session_id,
            user_id: user.id,
            role: user.role,
            tenant_id: user.tenant_id,
        })
    }

    fn login_failed(&self, username: &str, user: Option<&User>, reason: &str) -> GuardError {
        let mut event = AuditEvent::new(AuditAction::LoginFailed)
            .with_source("auth")
            .with_detail("username", username)
            .with_detail("reason", reason);
        if let Some(user) = user {
            event = event.with_user(user.id.clone()).with_tenant(user.tenant_id.clone());
        }
        self.audit.append(event);
        counter!("trustgate_logins_total", 1, "outcome" => "failure");
        GuardError::AuthenticationFailed
    }

    /// End the session behind a token; repeating it is harmless
    pub fn logout(&self, token: &str) -> GuardResult<()> {
        let claims = self.tokens.decode(token).inspect_err(|error| self.token_failed(error))?;

        if self.sessions.invalidate(&claims.session_id) {
            self.audit.append(
                AuditEvent::new(AuditAction::Logout)
                    .with_source("auth")
                    .with_user(claims.user_id.clone())
                    .with_tenant(claims.tenant_id.clone())
                    .with_detail("session_id", claims.session_id.clone()),
            );
        }
        Ok(())
    }

    /// Verify a token, sliding its session forward
    pub fn validate_token(&self, token: &str) -> GuardResult<Claims> {
        self.tokens.verify(token).inspect_err(|error| self.token_failed(error))
    }

    fn token_failed(&self, error: &GuardError) {
        let mut event = AuditEvent::new(AuditAction::TokenValidationFailed)
            .with_source("auth")
            .with_detail("kind", error.audit_kind());
        if let GuardError::SessionExpired { session_id } = error {
            event = event.with_detail("session_id", session_id.clone());
        }
        self.audit.append(event);
    }

    /// Verification failures yield `false`
    pub fn has_permission(&self, token: &str, permission: Permission) -> bool {
        self.permissions.has_permission(token, permission)
    }

    /// Admit the caller or fail with `InsufficientPermission`
    pub fn require_permission(&self, token: &str, permission: Permission) -> GuardResult<Claims> {
        match self.permissions.authorize(token, permission) {
            Ok(claims) => Ok(claims),
            Err(denial) => {
                let mut event = AuditEvent::new(AuditAction::PermissionDenied)
                    .with_source("rbac")
                    .with_detail("required", permission.as_str());
                match &denial {
                    Denial::Unauthenticated(error) => {
                        event = event.with_detail("kind", error.audit_kind());
                    }
                    Denial::Missing(claims) => {
                        event = event
                            .with_user(claims.user_id.clone())
                            .with_tenant(claims.tenant_id.clone())
                            .with_detail("role", claims.role.as_str());
                    }
                }
                self.audit.append(event);
                Err(GuardError::InsufficientPermission { required: permission })
            }
        }
    }

    /// Verify an optional token, treating a bad one as absent
    fn optional_claims(&self, token: Option<&str>) -> Option<Claims> {
        let token = token?;
        match self.tokens.verify(token) {
            Ok(claims) => Some(claims),
            Err(error) => {
                self.token_failed(&error);
                None
            }
        }
    }

    /// Mint an indicator; audience is the token's `tenant:role` or `public`
    pub fn generate_resource_indicator(&self, resource_type: &str, resource_id: &str, token: Option<&str>) -> GuardResult<ResourceIndicator> {
        let claims = self.optional_claims(token);
        self.indicators.generate(resource_type, resource_id, claims.as_ref())
    }

    pub fn validate_resource_indicator(&self, indicator: &str, token: Option<&str>) -> IndicatorValidation {
        let claims = self.optional_claims(token);
        self.indicators.validate(indicator, claims.as_ref())
    }

    /// Sliding-window admission for an arbitrary identifier
    pub fn enforce(&self, identifier: &str, max_requests: u32, window: Duration) -> GuardResult<RateLimitDecision> {
        self.limiter.enforce(identifier, max_requests, window)
    }

    /// Admission with the configured defaults; rejection is an error
    pub fn check_rate_limit(&self, identifier: &str) -> GuardResult<RateLimitDecision> {
        self.limiter.check(identifier)
    }

    /// Record a dispatcher event
    pub fn log_audit_event(&self, event: AuditEvent) -> Option<AuditEntry> {
        self.audit.append(event)
    }

    /// Query the audit log on behalf of a caller
    ///
    /// Requires `view_audit_logs`. With multi-tenancy on, non-administrators
    /// only ever see their own tenant regardless of the requested filter.
    pub fn query_audit_log(&self, token: &str, mut query: AuditQuery) -> GuardResult<Vec<AuditEntry>> {
        let claims = self.require_permission(token, Permission::ViewAuditLogs)?;
        if self.config.enable_multi_tenant && !claims.role.is_administrator() {
            query.tenant_id = Some(claims.tenant_id);
        }
        Ok(self.audit.query(&query))
    }

    /// Enable or disable an account; disabling ends its sessions
    pub fn set_user_active(&self, token: &str, user_id: &str, active: bool) -> GuardResult<User> {
        let admin = self.require_permission(token, Permission::ManageUsers)?;
        let user = self.users.set_active(user_id, active)?;
        let ended = if active { 0 } else { self.sessions.invalidate_user(user_id) };

        self.audit.append(
            AuditEvent::new(AuditAction::UserUpdated)
                .with_source("users")
                .with_user(admin.user_id)
                .with_tenant(user.tenant_id.clone())
                .with_detail("target_user", user.id.clone())
                .with_detail("is_active", active)
                .with_detail("sessions_ended", ended),
        );
        Ok(user)
    }

    /// Change an account's role; existing tokens keep their old claims until re-login
    pub fn set_user_role(&self, token: &str, user_id: &str, role: Role) -> GuardResult<User> {
        let admin = self.require_permission(token, Permission::ManageUsers)?;
        let user = self.users.set_role(user_id, role)?;

        self.audit.append(
            AuditEvent::new(AuditAction::UserUpdated)
                .with_source("users")
                .with_user(admin.user_id)
                .with_tenant(user.tenant_id.clone())
                .with_detail("target_user", user.id.clone())
                .with_detail("role", role.as_str()),
        );
        Ok(user)
    }

    pub fn open_boundary(&self, context: serde_json::Value) -> GuardResult<String> {
        self.boundaries.open(context)
    }

    pub fn record(&self, boundary_id: &str, kind: RecordKind, message: impl Into<String>, details: serde_json::Value) -> GuardResult<()> {
        self.boundaries.record(boundary_id, kind, message, details)
    }

    pub fn close_boundary(&self, boundary_id: &str, success: bool) -> GuardResult<ErrorBoundary> {
        self.boundaries.close(boundary_id, success)
    }

    /// Drop lapsed sessions, expired indicators and idle limiter buckets
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            sessions: self.sessions.purge_expired(),
            resource_indicators: self.indicators.purge_expired(),
            rate_limit_buckets: self.limiter.sweep(),
        };
        info!(
            sessions = report.sessions,
            resource_indicators = report.resource_indicators,
            rate_limit_buckets = report.rate_limit_buckets,
            at = %self.clock.now(),
            "Sweep completed"
        );
        report
    }
}

/// Counts removed by [`TrustGate::sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sessions: usize,
    pub resource_indicators: usize,
    pub rate_limit_buckets: usize,
}
