//! User model and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account role. `User` and `Admin` are built in; anything else is a custom
/// role that carries only ordinary capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Role {
    User,
    Admin,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Custom(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "" => Err("Role is required".to_string()),
            _ => Ok(Role::Custom(normalized)),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// A user row. `ban_reason` and `ban_expires_at` only mean something while
/// `banned` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub role: String,
    pub banned: bool,
    pub ban_reason: Option<String>,
    pub ban_expires_at: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Get the role as a Role enum
    pub fn role_enum(&self) -> Role {
        Role::from(self.role.clone())
    }

    /// Whether the stored ban is still in force at `now`. A timed ban whose
    /// expiry has passed no longer counts even if the flag is still set.
    pub fn ban_active_at(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.ban_expires_at.map_or(true, |expires| expires > now)
    }

    /// The flag is set but the expiry has passed; the row needs correcting.
    pub fn ban_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.banned && self.ban_expires_at.map_or(false, |expires| expires <= now)
    }
}

/// Public view of a user, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_expires_at: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        let banned = user.ban_active_at(Utc::now());
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            banned,
            ban_reason: if banned { user.ban_reason } else { None },
            ban_expires_at: if banned { user.ban_expires_at } else { None },
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user(banned: bool, expires: Option<DateTime<Utc>>) -> User {
        let now = Utc::now();
        User {
            id: "u1".to_string(),
            email: "alice@test.com".to_string(),
            password_hash: "x".to_string(),
            name: None,
            role: "user".to_string(),
            banned,
            ban_reason: banned.then(|| "abuse".to_string()),
            ban_expires_at: expires,
            email_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" user ".parse::<Role>().unwrap(), Role::User);
        assert_eq!(
            "Moderator".parse::<Role>().unwrap(),
            Role::Custom("moderator".to_string())
        );
        assert!("".parse::<Role>().is_err());
        assert_eq!(Role::from(String::new()), Role::User);
    }

    #[test]
    fn test_permanent_ban_is_always_active() {
        let u = user(true, None);
        assert!(u.ban_active_at(Utc::now() + Duration::days(3650)));
        assert!(!u.ban_lapsed_at(Utc::now()));
    }

    #[test]
    fn test_timed_ban_lapses() {
        let now = Utc::now();
        let u = user(true, Some(now + Duration::hours(1)));
        assert!(u.ban_active_at(now));
        assert!(!u.ban_active_at(now + Duration::hours(2)));
        assert!(u.ban_lapsed_at(now + Duration::hours(2)));
    }

    #[test]
    fn test_summary_hides_unused_ban_fields() {
        let now = Utc::now();
        let mut u = user(true, Some(now - Duration::minutes(1)));
        u.password_hash = "secret-hash".to_string();
        let summary = UserSummary::from(u);
        assert!(!summary.banned);
        assert!(summary.ban_reason.is_none());

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
