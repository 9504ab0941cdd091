//! The signed-in user's session.
//!
//! A session is created from the identity provider's signed token, persisted in
//! the state directory for the rest of the session, and torn down on logout or
//! once the token has expired. It is passed explicitly to everything that
//! talks to the backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SessionError;

const SESSION_FILE: &str = "session.json";

/// Authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub email: String,
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct Claims {
    email: Option<String>,
    exp: Option<i64>,
}

impl Session {
    /// Decode the token payload and extract the user's email.
    ///
    /// The signature is not verified here; the backend does that on every call.
    pub fn from_token(token: &str) -> Result<Self, SessionError> {
        let token = token.trim();
        let mut parts = token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_)) => payload,
            _ => return Err(SessionError::Malformed),
        };
        let bytes = general_purpose::URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        let claims: Claims = serde_json::from_slice(&bytes)?;
        let email = claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(SessionError::MissingEmail)?;
        Ok(Session {
            email,
            token: token.to_string(),
            expires_at: claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Path of the session file inside `state_dir`.
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(SESSION_FILE)
    }

    /// Decode `token` and persist the resulting session.
    pub fn login(token: &str, state_dir: &Path) -> Result<Self, SessionError> {
        let session = Self::from_token(token)?;
        let path = Self::path(state_dir);
        let data = serde_json::to_string_pretty(&session)?;
        fs::write(&path, data).map_err(|source| SessionError::Io { path, source })?;
        info!(email = %session.email, "logged in");
        Ok(session)
    }

    /// Load the persisted session. Expired sessions are removed and reported as absent.
    pub fn load(state_dir: &Path, now: DateTime<Utc>) -> Result<Option<Self>, SessionError> {
        let path = Self::path(state_dir);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SessionError::Io { path, source }),
        };
        let session: Session = match serde_json::from_str(&data) {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding unreadable session file: {e}");
                Self::logout(state_dir)?;
                return Ok(None);
            }
        };
        if session.is_expired(now) {
            info!(email = %session.email, "session expired");
            Self::logout(state_dir)?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Remove the persisted session, if any.
    pub fn logout(state_dir: &Path) -> Result<(), SessionError> {
        let path = Self::path(state_dir);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }
}

#[cfg(test)]
pub(crate) fn token_for(email: &str, exp: Option<i64>) -> String {
    let mut claims = serde_json::json!({ "email": email, "iss": "accounts.example.com" });
    if let Some(exp) = exp {
        claims["exp"] = serde_json::json!(exp);
    }
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJSUzI1NiJ9.{payload}.c2lnbmF0dXJl")
}
