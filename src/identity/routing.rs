//! Post-login destination.

use serde::Serialize;

use super::authz::AuthorizationEngine;
use crate::db::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    AdminArea,
    UserArea,
}

impl Destination {
    pub fn path(&self) -> &'static str {
        match self {
            Destination::AdminArea => "/admin",
            Destination::UserArea => "/dashboard",
        }
    }
}

/// Picks where an authenticated user lands. Only the stored role and ban
/// state count; there is no list of privileged addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginRouter {
    engine: AuthorizationEngine,
}

impl LoginRouter {
    pub fn new(engine: AuthorizationEngine) -> Self {
        Self { engine }
    }

    pub fn decide(&self, user: &User) -> Destination {
        if self.engine.is_admin(user) {
            Destination::AdminArea
        } else {
            Destination::UserArea
        }
    }
}
