//! Admin invite lifecycle
//!
//! An invite is created pending with a random token and a fixed expiry.
//! Looking the token up classifies it; accepting a valid invite marks it
//! accepted and promotes the accepting user to admin.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AdminInvite, InviteStatus, Profile};

pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

/// Result of looking an invite token up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteValidity {
    Valid,
    Invalid,
    Expired,
    Used,
}

impl InviteValidity {
    pub fn message(&self) -> &'static str {
        match self {
            InviteValidity::Valid => "invitation is valid",
            InviteValidity::Invalid => "invitation is invalid or has been revoked",
            InviteValidity::Expired => "invitation has expired",
            InviteValidity::Used => "invitation has already been used",
        }
    }
}

/// Classify an invite record at `now`.
///
/// Expiry is checked before the stored status, so an accepted invite that
/// is past its expiry reports `Expired`.
pub fn classify(invite: Option<&AdminInvite>, now: DateTime<Utc>) -> InviteValidity {
    let Some(invite) = invite else {
        return InviteValidity::Invalid;
    };

    if invite.expires_at < now {
        return InviteValidity::Expired;
    }

    match invite.status {
        InviteStatus::Accepted => InviteValidity::Used,
        InviteStatus::Revoked => InviteValidity::Invalid,
        InviteStatus::Pending => InviteValidity::Valid,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("email address is required")]
    MissingEmail,
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("an invitation for {0} is already pending")]
    AlreadyPending(String),
    #[error("{0} is already an administrator")]
    AlreadyAdmin(String),
}

/// Trim and lowercase an email, rejecting obviously malformed ones
pub fn normalize_email(email: &str) -> Result<String, InviteError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(InviteError::MissingEmail);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(email.to_lowercase())
        }
        _ => Err(InviteError::InvalidEmail(email.to_string())),
    }
}

/// Check that a new invite may be sent, returning the normalized email
pub fn check_new_invite(
    email: &str,
    has_pending_invite: bool,
    existing_profile: Option<&Profile>,
) -> Result<String, InviteError> {
    let email = normalize_email(email)?;

    if has_pending_invite {
        return Err(InviteError::AlreadyPending(email));
    }
    if existing_profile.is_some_and(|p| p.is_admin()) {
        return Err(InviteError::AlreadyAdmin(email));
    }

    Ok(email)
}

/// Build a fresh pending invite
pub fn new_invite(
    email: &str,
    invited_by: Uuid,
    now: DateTime<Utc>,
    expiry_days: i64,
) -> AdminInvite {
    AdminInvite {
        id: Uuid::new_v4(),
        email: email.to_string(),
        token: Uuid::new_v4().to_string(),
        invited_by,
        status: InviteStatus::Pending,
        created_at: now,
        expires_at: now + Duration::days(expiry_days),
        accepted_by: None,
        accepted_at: None,
    }
}

/// Link the invitee opens to accept
pub fn accept_url(public_url: &str, token: &str) -> String {
    format!(
        "{}/admin/accept-invite?token={}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}
