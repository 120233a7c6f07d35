//! Admin credentials and bearer sessions.
//!
//! The password is configured as a SHA-256 hex digest. Login hands out a
//! random token; only its digest is kept in the session table.

use std::collections::HashMap;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid username or password")]
    BadCredentials,
    #[error("missing or malformed authorization header")]
    MissingCredentials,
    #[error("session expired or unknown")]
    InvalidSession,
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn digest_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AdminAuth {
    username: String,
    password_sha256: String,
    ttl: Duration,
    sessions: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl AdminAuth {
    pub fn new(username: impl Into<String>, password_sha256: impl Into<String>, ttl: Duration) -> Self {
        Self {
            username: username.into(),
            password_sha256: password_sha256.into().to_ascii_lowercase(),
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn check(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let user_ok = digest_eq(username, &self.username);
        let pass_ok = digest_eq(&hash_password(password), &self.password_sha256);
        if user_ok && pass_ok {
            Ok(())
        } else {
            Err(AuthError::BadCredentials)
        }
    }

    pub fn login(&self, username: &str, password: &str, now: DateTime<Utc>) -> Result<Session, AuthError> {
        self.check(username, password)?;
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);
        let expires_at = now + self.ttl;

        let mut sessions = self.sessions.write();
        sessions.retain(|_, expiry| *expiry > now);
        sessions.insert(hash_password(&token), expires_at);
        tracing::info!(user = %self.username, %expires_at, "admin session issued");
        Ok(Session { token, expires_at })
    }

    /// Accepts `Bearer <token>` from [`AdminAuth::login`] or
    /// `Basic <base64(user:password)>`.
    pub fn authorize(&self, header: Option<&str>, now: DateTime<Utc>) -> Result<(), AuthError> {
        let header = header.map(str::trim).ok_or(AuthError::MissingCredentials)?;
        if let Some(token) = header.strip_prefix("Bearer ") {
            let sessions = self.sessions.read();
            return match sessions.get(&hash_password(token.trim())) {
                Some(expiry) if *expiry > now => Ok(()),
                _ => Err(AuthError::InvalidSession),
            };
        }
        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|_| AuthError::MissingCredentials)?;
            let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MissingCredentials)?;
            let (user, password) = decoded
                .split_once(':')
                .ok_or(AuthError::MissingCredentials)?;
            return self.check(user, password);
        }
        Err(AuthError::MissingCredentials)
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.write().remove(&hash_password(token)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AdminAuth {
        AdminAuth::new("admin", hash_password("hunter2"), Duration::minutes(30))
    }

    #[test]
    fn password_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn login_issues_a_working_bearer_token() {
        let auth = auth();
        let now = Utc::now();
        assert_eq!(auth.login("admin", "wrong", now), Err(AuthError::BadCredentials));
        let session = auth.login("admin", "hunter2", now).unwrap();
        assert_eq!(session.token.len(), 64);
        let header = format!("Bearer {}", session.token);
        assert!(auth.authorize(Some(&header), now).is_ok());
        assert_eq!(
            auth.authorize(Some(&header), now + Duration::minutes(31)),
            Err(AuthError::InvalidSession)
        );
        assert!(auth.logout(&session.token));
        assert_eq!(auth.authorize(Some(&header), now), Err(AuthError::InvalidSession));
    }

    #[test]
    fn basic_credentials_are_accepted() {
        let auth = auth();
        let now = Utc::now();
        let good = format!("Basic {}", general_purpose::STANDARD.encode("admin:hunter2"));
        let bad = format!("Basic {}", general_purpose::STANDARD.encode("admin:nope"));
        assert!(auth.authorize(Some(&good), now).is_ok());
        assert_eq!(auth.authorize(Some(&bad), now), Err(AuthError::BadCredentials));
        assert_eq!(auth.authorize(None, now), Err(AuthError::MissingCredentials));
        assert_eq!(
            auth.authorize(Some("Token abc"), now),
            Err(AuthError::MissingCredentials)
        );
    }
}
