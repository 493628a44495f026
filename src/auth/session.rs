//! Session tokens
//!
//! HMAC-signed tokens carried in a cookie or bearer header.
//! No server-side session storage needed.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Session data for a signed-in local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Session for `user_id` valid for `max_age_secs`
    pub fn new(user_id: &str, max_age_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(max_age_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

fn mac_for(secret: &str, payload_b64: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session key: {e}")))?;
    mac.update(payload_b64.as_bytes());
    Ok(mac)
}

/// Create a signed session token
///
/// Token format: `base64(payload).base64(hmac_sha256(payload))`
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());

    let signature = mac_for(secret, &payload_b64)?.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Errors
/// `Unauthorized` if the token is malformed, forged or expired
pub fn verify_session_token(token: &str, secret: &str) -> Result<Session, AppError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;
    mac_for(secret, payload_b64)?
        .verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;
    let session: Session =
        serde_json::from_slice(&payload_bytes).map_err(|_| AppError::Unauthorized)?;

    if session.is_expired() {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}
