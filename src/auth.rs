//! Authentication and Authorization
//!
//! - Argon2 password hashing
//! - Opaque bearer tokens, stored only as SHA-256 digests
//! - Registration input checks

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::models::Session;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(e) => {
            debug!("Stored password hash is malformed: {}", e);
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Digest under which a bearer token is stored
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Create a new session, returning the plaintext token and the row to store
pub fn new_session(user_id: Uuid, now: DateTime<Utc>, ttl_days: i64) -> (String, Session) {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let session = Session {
        token_hash: token_digest(&token),
        user_id,
        created_at: now,
        expires_at: now + Duration::days(ttl_days),
    };
    (token, session)
}

pub fn session_is_live(session: &Session, now: DateTime<Utc>) -> bool {
    session.expires_at > now
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn check_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

/// Usernames are 3-32 characters of letters, digits, '_' or '-'
pub fn check_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err("Username must be between 3 and 32 characters".to_string());
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Username may only contain letters, digits, '_' and '-'".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn test_session_token_is_not_stored() {
        let now = Utc::now();
        let user = Uuid::new_v4();
        let (token, session) = new_session(user, now, 7);
        assert_eq!(token.len(), 64);
        assert_ne!(session.token_hash, token);
        assert_eq!(session.token_hash, token_digest(&token));
        assert!(session_is_live(&session, now));
        assert!(!session_is_live(&session, now + Duration::days(8)));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer   abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[test]
    fn test_password_and_username_rules() {
        assert!(check_password("12345").is_err());
        assert!(check_password("123456").is_ok());
        assert!(check_username("ab").is_err());
        assert!(check_username("eco_warrior-1").is_ok());
        assert!(check_username("eco warrior").is_err());
    }
}
