//! Database models split into domain-specific modules.
//!
//! This module re-exports all types so callers can import from `crate::db`.

pub mod account;
pub mod session;
pub mod user;
pub mod verification;

pub use account::*;
pub use session::*;
pub use user::*;
pub use verification::*;
