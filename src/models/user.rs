use serde::{Deserialize, Serialize};

use crate::error::{msg, AppError, Result};

/// Basic email format validation.
///
/// Validates that email has exactly one @ symbol, a non-empty local part,
/// and a domain with at least one dot. Intentionally permissive - this is
/// a sanity check, not RFC 5322 compliance.
pub fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::BadRequest(msg::EMAIL_EMPTY.into()));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    let local_part = parts[0];
    let domain_part = parts[1];

    if local_part.is_empty() || local_part.contains(' ') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    if domain_part.is_empty()
        || !domain_part.contains('.')
        || domain_part.starts_with('.')
        || domain_part.ends_with('.')
    {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }

    Ok(())
}

/// Authentication principal. Distinct from the domain `Customer` record it is
/// linked to - a user exists from sign-up on, a customer only after
/// registration completes.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password: String,
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        validate_email_format(&self.email)?;
        if self.password.len() < 8 {
            return Err(AppError::BadRequest(msg::PASSWORD_TOO_SHORT.into()));
        }
        if self.password.len() > 128 {
            return Err(AppError::BadRequest(msg::PASSWORD_TOO_LONG.into()));
        }
        Ok(())
    }
}

/// An authenticated browser session. The raw token only ever travels in the
/// cookie; the database stores its SHA-256 hash.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
}
