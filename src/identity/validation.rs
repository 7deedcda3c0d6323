//! Input validation for identity operations.
//!
//! Validators return `AuthError::Validation` tagged with the offending field
//! so the HTTP layer can report it per field.

use lazy_static::lazy_static;
use regex::Regex;

use super::AuthError;
use crate::db::Role;

lazy_static! {
    /// Deliberately loose: one `@`, no whitespace, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();

    /// Custom role names: lowercase identifier, 1-32 chars
    static ref ROLE_REGEX: Regex = Regex::new(
        r"^[a-z][a-z0-9_-]{0,31}$"
    ).unwrap();
}

/// Passwords shorter than this are rejected whatever the configured minimum.
pub const PASSWORD_FLOOR: usize = 6;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;
const MAX_BAN_REASON_LEN: usize = 500;

/// Trim and lowercase an email, then check its shape.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let normalized = email.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(AuthError::validation("email", "Email is required"));
    }

    if normalized.len() > MAX_EMAIL_LEN {
        return Err(AuthError::validation(
            "email",
            "Email is too long (max 254 characters)",
        ));
    }

    if !EMAIL_REGEX.is_match(&normalized) {
        return Err(AuthError::validation("email", "Invalid email address"));
    }

    Ok(normalized)
}

/// Password strength is a length floor, counted in characters.
pub fn check_password(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_length {
        return Err(AuthError::WeakPassword { min_length });
    }
    Ok(())
}

/// Optional display name; blank collapses to `None`.
pub fn normalize_name(name: Option<&str>) -> Result<Option<String>, AuthError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if name.chars().count() > MAX_NAME_LEN {
        return Err(AuthError::validation(
            "name",
            "Name is too long (max 100 characters)",
        ));
    }

    Ok(Some(name.to_string()))
}

pub fn parse_role(role: &str) -> Result<Role, AuthError> {
    let parsed: Role = role
        .parse()
        .map_err(|e: String| AuthError::validation("role", e))?;

    if let Role::Custom(name) = &parsed {
        if !ROLE_REGEX.is_match(name) {
            return Err(AuthError::validation(
                "role",
                "Role must be lowercase letters, digits, '-' or '_' (max 32 characters)",
            ));
        }
    }

    Ok(parsed)
}

pub fn validate_ban_reason(reason: &str) -> Result<String, AuthError> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(AuthError::validation("reason", "Ban reason is required"));
    }

    if reason.chars().count() > MAX_BAN_REASON_LEN {
        return Err(AuthError::validation(
            "reason",
            "Ban reason is too long (max 500 characters)",
        ));
    }

    Ok(reason.to_string())
}

pub fn validate_ban_duration(duration_seconds: Option<i64>) -> Result<Option<i64>, AuthError> {
    match duration_seconds {
        Some(seconds) if seconds <= 0 => Err(AuthError::validation(
            "duration_seconds",
            "Ban duration must be positive",
        )),
        // Cap at 100 years so the expiry stays representable
        Some(seconds) if seconds > 100 * 365 * 24 * 3600 => Err(AuthError::validation(
            "duration_seconds",
            "Ban duration is too long",
        )),
        other => Ok(other),
    }
}
