//! Capabilities derived from a user's role and ban state.
//!
//! Everything here is a pure function of the persisted user row and the
//! current time. Nothing is cached between calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use super::AuthError;
use crate::db::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewOwnAccount,
    ManageOwnSessions,
    ChangeOwnPassword,
    AccessAdminArea,
    ListUsers,
    ManageRoles,
    BanUsers,
}

impl Capability {
    const ORDINARY: [Capability; 3] = [
        Capability::ViewOwnAccount,
        Capability::ManageOwnSessions,
        Capability::ChangeOwnPassword,
    ];

    const ADMINISTRATIVE: [Capability; 4] = [
        Capability::AccessAdminArea,
        Capability::ListUsers,
        Capability::ManageRoles,
        Capability::BanUsers,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn ordinary() -> Self {
        Self(Capability::ORDINARY.into_iter().collect())
    }

    pub fn administrative() -> Self {
        Self(
            Capability::ORDINARY
                .into_iter()
                .chain(Capability::ADMINISTRATIVE)
                .collect(),
        )
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanState {
    NotBanned,
    Banned {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationEngine;

impl AuthorizationEngine {
    pub fn new() -> Self {
        Self
    }

    /// A timed ban that has run out reads as `NotBanned` even before the
    /// row is corrected.
    pub fn ban_state_at(&self, user: &User, now: DateTime<Utc>) -> BanState {
        if user.ban_active_at(now) {
            BanState::Banned {
                reason: user.ban_reason.clone().unwrap_or_default(),
                expires_at: user.ban_expires_at,
            }
        } else {
            BanState::NotBanned
        }
    }

    pub fn ban_state(&self, user: &User) -> BanState {
        self.ban_state_at(user, Utc::now())
    }

    pub fn capabilities_at(&self, user: &User, now: DateTime<Utc>) -> CapabilitySet {
        match self.ban_state_at(user, now) {
            BanState::Banned { .. } => CapabilitySet::none(),
            BanState::NotBanned if user.role_enum().is_admin() => CapabilitySet::administrative(),
            BanState::NotBanned => CapabilitySet::ordinary(),
        }
    }

    /// Empty while banned, whatever the role.
    pub fn capabilities_for(&self, user: &User) -> CapabilitySet {
        self.capabilities_at(user, Utc::now())
    }

    pub fn is_admin_at(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.role_enum().is_admin() && !user.ban_active_at(now)
    }

    pub fn is_admin(&self, user: &User) -> bool {
        self.is_admin_at(user, Utc::now())
    }

    /// Like `capabilities_at`, but a ban is reported as `BannedAccount`.
    pub fn authorize_at(&self, user: &User, now: DateTime<Utc>) -> Result<CapabilitySet, AuthError> {
        match self.ban_state_at(user, now) {
            BanState::Banned { reason, expires_at } => {
                Err(AuthError::BannedAccount { reason, expires_at })
            }
            BanState::NotBanned => Ok(self.capabilities_at(user, now)),
        }
    }
}
