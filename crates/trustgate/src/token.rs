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

//! Signed session tokens
//!
//! Tokens are HS256 JWTs. A token is accepted only while its signature
//! verifies, its `exp` has not passed and the session it names is still live;
//! every accepted verification slides that session forward.

use crate::clock::{SharedClock, to_chrono};
use crate::error::{GuardError, GuardResult};
use crate::rbac::{Permission, PermissionTable, Role};
use crate::session::SessionStore;
use crate::users::User;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const TOKEN_ISSUER: &str = "trustgate";
pub const TOKEN_AUDIENCE: &str = "workflow-api";

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub tenant_id: String,
    pub session_id: String,
    pub permissions: Vec<Permission>,
}

impl Claims {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// `tenant:role` pair used as a resource indicator audience
    pub fn audience_scope(&self) -> String {
        format!("{}:{}", self.tenant_id, self.role)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A freshly minted token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Issues and verifies tokens against the process-wide secret
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expires_in: Duration,
    sessions: Arc<SessionStore>,
    clock: SharedClock,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").field("expires_in", &self.expires_in).finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service; an empty secret is a fatal configuration error
    pub fn new(secret: &str, expires_in: std::time::Duration, sessions: Arc<SessionStore>, clock: SharedClock) -> GuardResult<Self> {
        if secret.is_empty() {
            return Err(GuardError::configuration("JWT secret must not be empty"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expires_in: to_chrono(expires_in),
            sessions,
            clock,
        })
    }

    /// Sign a claim set for `user` bound to `session_id`
    pub fn issue(&self, user: &User, session_id: &str) -> GuardResult<IssuedToken> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user.id.clone(),
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            exp: (now + self.expires_in).timestamp(),
            iat: now.timestamp(),
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
            session_id: session_id.to_string(),
            permissions: PermissionTable::global().permissions_for(user.role),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| GuardError::internal(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken { token, claims })
    }

    /// Check signature, claim shape and expiry without consulting the session
    pub fn decode(&self, token: &str) -> GuardResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| GuardError::InvalidToken { reason: e.to_string() })?;
        let claims = data.claims;

        if claims.sub != claims.user_id {
            return Err(GuardError::InvalidToken {
                reason: "subject does not match user id".to_string(),
            });
        }
        if self.clock.now().timestamp() > claims.exp {
            return Err(GuardError::InvalidToken {
                reason: "token has expired".to_string(),
            });
        }

        Ok(claims)
    }

    /// Full verification; a success slides the session expiry forward
    pub fn verify(&self, token: &str) -> GuardResult<Claims> {
        let claims = self.decode(token)?;

        match self.sessions.touch_owned(&claims.session_id, &claims.user_id) {
            Some(_) => {
                debug!(user_id = %claims.user_id, session_id = %claims.session_id, "Token verified");
                Ok(claims)
            }
            None => Err(GuardError::SessionExpired {
                session_id: claims.session_id,
            }),
        }
    }
}
