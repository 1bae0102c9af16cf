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

//! Error handling for the authorization core
//! Renders failures in RFC 7807 Problem Details format for the transport layer

use crate::rbac::Permission;
use crate::resource_indicator::IndicatorFailure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Authorization error kinds
///
/// `InvalidToken` and `SessionExpired` render the same message on purpose; the
/// distinction is only kept for audit metadata.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Authentication failed: invalid username or password")]
    AuthenticationFailed,

    #[error("Invalid or expired token")]
    InvalidToken { reason: String },

    #[error("Invalid or expired token")]
    SessionExpired { session_id: String },

    #[error("Insufficient permissions: {required} required")]
    InsufficientPermission { required: Permission },

    #[error("Rate limit exceeded. Try again in {} ms", .retry_after.as_millis())]
    RateLimitExceeded { limit: u32, retry_after: Duration },

    #[error("Resource indicator invalid: {reason}")]
    ResourceIndicatorInvalid { reason: IndicatorFailure },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl GuardError {
    pub fn validation(message: impl Into<String>) -> Self {
        GuardError::Validation { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        GuardError::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GuardError::Internal { message: message.into() }
    }

    /// HTTP status code the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::AuthenticationFailed => 401,
            GuardError::InvalidToken { .. } | GuardError::SessionExpired { .. } => 401,
            GuardError::InsufficientPermission { .. } => 403,
            GuardError::RateLimitExceeded { .. } => 429,
            GuardError::ResourceIndicatorInvalid { reason } => match reason {
                IndicatorFailure::NotFound => 404,
                IndicatorFailure::AuthenticationRequired => 401,
                IndicatorFailure::InsufficientPermissions => 403,
                IndicatorFailure::Tampered | IndicatorFailure::Expired => 400,
            },
            GuardError::Validation { .. } => 400,
            GuardError::NotFound { .. } => 404,
            GuardError::Configuration { .. } | GuardError::Internal { .. } | GuardError::SerdeJson(_) => 500,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GuardError::AuthenticationFailed => "authentication_failed",
            // Both token failures share one identifier so callers cannot tell them apart.
            GuardError::InvalidToken { .. } | GuardError::SessionExpired { .. } => "invalid_token",
            GuardError::InsufficientPermission { .. } => "insufficient_permission",
            GuardError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GuardError::ResourceIndicatorInvalid { .. } => "resource_indicator_invalid",
            GuardError::Validation { .. } => "validation_error",
            GuardError::NotFound { .. } => "not_found",
            GuardError::Configuration { .. } => "configuration_error",
            GuardError::Internal { .. } => "internal_error",
            GuardError::SerdeJson(_) => "json_error",
        }
    }

    /// Internal kind used in audit metadata, never shown to callers
    pub fn audit_kind(&self) -> &'static str {
        match self {
            GuardError::InvalidToken { .. } => "invalid_token",
            GuardError::SessionExpired { .. } => "session_expired",
            other => other.error_type(),
        }
    }
}

/// RFC 7807 Problem Details response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type")]
    pub problem_type: String,

    /// A short, human-readable summary of the problem type
    pub title: String,

    /// The HTTP status code the transport should use
    pub status: u16,

    /// A human-readable explanation specific to this occurrence
    pub detail: String,

    /// A URI reference that identifies the specific occurrence
    pub instance: String,

    /// Additional extension members
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ProblemDetails {
    /// Create a new problem details document
    pub fn new(error: &GuardError, instance: String) -> Self {
        let status = error.status_code();
        let mut details = Self {
            problem_type: format!("https://trustgate.synerthink.com/problems/{}", error.error_type()),
            title: Self::status_to_title(status).to_string(),
            status,
            // Internal failures never leak their message.
            detail: match error {
                GuardError::Configuration { .. } | GuardError::Internal { .. } | GuardError::SerdeJson(_) => "An internal error occurred".to_string(),
                other => other.to_string(),
            },
            instance,
            extensions: HashMap::new(),
        };

        match error {
            GuardError::RateLimitExceeded { limit, retry_after } => {
                details = details
                    .with_extension("retryAfter".to_string(), serde_json::json!(retry_after.as_millis() as u64))
                    .with_extension("limit".to_string(), serde_json::json!(limit));
            }
            GuardError::InsufficientPermission { required } => {
                details = details.with_extension("required".to_string(), serde_json::json!(required.as_str()));
            }
            GuardError::ResourceIndicatorInvalid { reason } => {
                details = details.with_extension("reason".to_string(), serde_json::json!(reason.as_str()));
            }
            _ => {}
        }

        details
    }

    /// Add extension data to the problem details
    pub fn with_extension(mut self, key: String, value: serde_json::Value) -> Self {
        self.extensions.insert(key, value);
        self
    }

    fn status_to_title(status: u16) -> &'static str {
        match status {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            _ => "Unknown Error",
        }
    }
}

/// Result type for authorization operations
pub type GuardResult<T> = Result<T, GuardError>;
