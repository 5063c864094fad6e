//! Bearer token authentication.
//!
//! ## Token Format
//!
//! ```text
//! <user_id>.<expiry_ms>.<signature>
//! ```
//!
//! `signature` is the lowercase hex HMAC-SHA256 of `<user_id>.<expiry_ms>`
//! under the server secret. The user id may itself contain dots; the last
//! two segments are always expiry and signature.

use crate::error::{ServerError, ServerResult};
use calcsync_core::{add_duration, Timestamp};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Write;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// How long issued tokens stay valid.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a 24 hour token lifetime.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    config: AuthConfig,
}

impl TokenIssuer {
    /// Creates an issuer.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `user_id`, valid from `now` for the configured
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] for an empty user id.
    pub fn issue(&self, user_id: &str, now: Timestamp) -> ServerResult<String> {
        if user_id.is_empty() {
            return Err(ServerError::InvalidRequest("user id is empty".into()));
        }
        let expiry = add_duration(now, self.config.token_expiry).timestamp_millis();
        let payload = format!("{user_id}.{expiry}");
        let signature = to_hex(&self.sign(payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    /// Validates a token at `now` and returns its user id.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unauthorized`] for malformed, forged or expired
    /// tokens.
    pub fn validate(&self, token: &str, now: Timestamp) -> ServerResult<String> {
        let malformed = || ServerError::Unauthorized("malformed token".into());
        let mut parts = token.rsplitn(3, '.');
        let signature = parts.next().ok_or_else(malformed)?;
        let expiry = parts.next().ok_or_else(malformed)?;
        let user_id = parts.next().filter(|u| !u.is_empty()).ok_or_else(malformed)?;

        let signature = from_hex(signature).ok_or_else(malformed)?;
        let payload = format!("{user_id}.{expiry}");
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::Unauthorized("invalid signature".into()))?;

        let expiry: i64 = expiry.parse().map_err(|_| malformed())?;
        if now.timestamp_millis() > expiry {
            return Err(ServerError::Unauthorized("token expired".into()));
        }
        Ok(user_id.to_string())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("HMAC key rejected: {e}")))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}
