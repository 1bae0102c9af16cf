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

//! Randomness, HMAC signing and password hashing helpers

use crate::error::{GuardError, GuardResult};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// PHC algorithm identifiers accepted for stored passwords
const ARGON2_ALGORITHMS: [&str; 3] = ["argon2id", "argon2i", "argon2d"];

static PASSWORD_VERIFICATIONS: AtomicU64 = AtomicU64::new(0);

static DECOY_HASH: LazyLock<Option<String>> = LazyLock::new(|| hash_password("trustgate-decoy-password").ok());

/// Fill a fresh buffer with `len` cryptographically secure random bytes
pub fn random_bytes(len: usize) -> GuardResult<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes).map_err(|_| GuardError::internal("Failed to generate random bytes"))?;
    Ok(bytes)
}

/// Random bytes rendered as unpadded URL-safe base64
pub fn random_token(len: usize) -> GuardResult<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(len)?))
}

/// Generate a random signing secret
pub fn generate_secret() -> GuardResult<String> {
    random_token(32)
}

/// HMAC-SHA256 signer over raw messages
pub struct HmacSigner {
    key: hmac::Key,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(secret: &[u8]) -> GuardResult<Self> {
        if secret.is_empty() {
            return Err(GuardError::configuration("HMAC secret must not be empty"));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        })
    }

    /// Sign a message and return the tag as unpadded URL-safe base64
    pub fn sign(&self, message: &[u8]) -> String {
        let tag = hmac::sign(&self.key, message);
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    /// Constant-time comparison of `signature` against the tag for `message`
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        match URL_SAFE_NO_PAD.decode(signature) {
            Ok(tag) => hmac::verify(&self.key, message, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

/// Hash a password with Argon2id into PHC string format
pub fn hash_password(password: &str) -> GuardResult<String> {
    let salt = SaltString::encode_b64(&random_bytes(16)?).map_err(|e| GuardError::internal(format!("Failed to encode salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GuardError::internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a PHC hash
///
/// Returns `Ok(false)` on mismatch and an error only when the stored hash is
/// malformed.
pub fn verify_password(password: &str, hash: &str) -> GuardResult<bool> {
    let parsed = argon2::PasswordHash::new(hash).map_err(|e| GuardError::internal(format!("Invalid password hash: {e}")))?;
    PASSWORD_VERIFICATIONS.fetch_add(1, Ordering::Relaxed);

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(GuardError::internal(format!("Password verification failed: {e}"))),
    }
}

/// Reject anything but an Argon2 PHC string
pub fn check_password_hash(hash: &str) -> GuardResult<()> {
    let parsed = argon2::PasswordHash::new(hash).map_err(|e| GuardError::validation(format!("invalid password hash: {e}")))?;
    if !ARGON2_ALGORITHMS.contains(&parsed.algorithm.as_str()) {
        return Err(GuardError::validation(format!("unsupported password hash algorithm: {}", parsed.algorithm)));
    }
    Ok(())
}

/// Run one verification against a fixed decoy hash
///
/// Used when no account matches, so an unknown username costs the same
/// Argon2 work as a wrong password.
pub fn verify_decoy(password: &str) {
    if let Some(hash) = DECOY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Build the decoy hash ahead of the first login
pub fn warm_decoy() {
    LazyLock::force(&DECOY_HASH);
}

/// Argon2 verifications run by this process
pub fn password_verifications() -> u64 {
    PASSWORD_VERIFICATIONS.load(Ordering::Relaxed)
}
