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

//! Configuration management for the authorization core

use crate::error::{GuardError, GuardResult};
use crate::rate_limiting::{DEFAULT_MAX_IDENTIFIERS, RateLimitConfig};
use std::env;
use std::time::Duration;

/// Startup configuration
#[derive(Clone)]
pub struct Config {
    /// Token signing secret; generated at startup when unset
    pub jwt_secret: Option<String>,

    /// Token lifetime
    pub jwt_expires_in: Duration,

    /// Sliding session inactivity limit
    pub session_timeout: Duration,

    pub enable_rbac: bool,
    pub enable_audit_log: bool,
    pub enable_multi_tenant: bool,
    pub enable_resource_indicators: bool,

    /// Resource indicator HMAC key; generated at startup when unset
    pub resource_indicator_secret: Option<String>,

    /// Default admission limit per window
    pub rate_limit_requests: u32,

    /// Default admission window
    pub rate_limit_window: Duration,

    /// Distinct rate limit identifiers tracked at once
    pub rate_limit_max_identifiers: usize,

    /// Identifier stamped into issued resource indicators
    pub server_id: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_expires_in", &self.jwt_expires_in)
            .field("session_timeout", &self.session_timeout)
            .field("enable_rbac", &self.enable_rbac)
            .field("enable_audit_log", &self.enable_audit_log)
            .field("enable_multi_tenant", &self.enable_multi_tenant)
            .field("enable_resource_indicators", &self.enable_resource_indicators)
            .field("resource_indicator_secret", &self.resource_indicator_secret.as_ref().map(|_| "<redacted>"))
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_max_identifiers", &self.rate_limit_max_identifiers)
            .field("server_id", &self.server_id)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expires_in: Duration::from_secs(24 * 60 * 60),
            session_timeout: Duration::from_secs(60 * 60),
            enable_rbac: true,
            enable_audit_log: true,
            enable_multi_tenant: true,
            enable_resource_indicators: true,
            resource_indicator_secret: None,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_identifiers: DEFAULT_MAX_IDENTIFIERS,
            server_id: "trustgate".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> GuardResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any name→value source
    pub fn from_lookup<F>(lookup: F) -> GuardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: lookup("JWT_SECRET"),
            jwt_expires_in: parse_var(&lookup, "JWT_EXPIRES_IN", defaults.jwt_expires_in, parse_duration)?,
            session_timeout: parse_var(&lookup, "SESSION_TIMEOUT", defaults.session_timeout, parse_duration)?,
            enable_rbac: parse_var(&lookup, "ENABLE_RBAC", defaults.enable_rbac, parse_bool)?,
            enable_audit_log: parse_var(&lookup, "ENABLE_AUDIT_LOG", defaults.enable_audit_log, parse_bool)?,
            enable_multi_tenant: parse_var(&lookup, "ENABLE_MULTI_TENANT", defaults.enable_multi_tenant, parse_bool)?,
            enable_resource_indicators: parse_var(&lookup, "ENABLE_RESOURCE_INDICATORS", defaults.enable_resource_indicators, parse_bool)?,
            resource_indicator_secret: lookup("RESOURCE_INDICATOR_SECRET"),
            rate_limit_requests: parse_var(&lookup, "RATE_LIMIT_REQUESTS", defaults.rate_limit_requests, |v| v.parse().ok())?,
            rate_limit_window: parse_var(&lookup, "RATE_LIMIT_WINDOW", defaults.rate_limit_window, parse_duration)?,
            rate_limit_max_identifiers: parse_var(&lookup, "RATE_LIMIT_MAX_IDENTIFIERS", defaults.rate_limit_max_identifiers, |v| v.parse().ok())?,
            server_id: lookup("TRUSTGATE_SERVER_ID").unwrap_or(defaults.server_id),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot start with
    pub fn validate(&self) -> GuardResult<()> {
        if self.jwt_secret.as_deref().is_some_and(|secret| secret.trim().is_empty()) {
            return Err(GuardError::configuration("JWT_SECRET is set but empty"));
        }
        if self.resource_indicator_secret.as_deref().is_some_and(|secret| secret.trim().is_empty()) {
            return Err(GuardError::configuration("RESOURCE_INDICATOR_SECRET is set but empty"));
        }
        if self.jwt_expires_in.is_zero() {
            return Err(GuardError::configuration("JWT_EXPIRES_IN must be positive"));
        }
        if self.session_timeout.is_zero() {
            return Err(GuardError::configuration("SESSION_TIMEOUT must be positive"));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window.is_zero() {
            return Err(GuardError::configuration("RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW must be positive"));
        }
        if self.rate_limit_max_identifiers == 0 {
            return Err(GuardError::configuration("RATE_LIMIT_MAX_IDENTIFIERS must be positive"));
        }
        if self.server_id.trim().is_empty() {
            return Err(GuardError::configuration("TRUSTGATE_SERVER_ID must not be empty"));
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_requests,
            window: self.rate_limit_window,
            max_identifiers: self.rate_limit_max_identifiers,
        }
    }
}

fn parse_var<T, L, P>(lookup: &L, name: &str, default: T, parse: P) -> GuardResult<T>
where
    L: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => parse(raw.trim()).ok_or_else(|| GuardError::configuration(format!("Invalid value for {name}: {raw}"))),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `500ms`, `30s`, `15m`, `24h`, `7d` or bare seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    let seconds = match unit {
        "ms" => return Some(Duration::from_millis(amount)),
        "" | "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(60 * 60)?,
        "d" => amount.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}
