//! Single-use verification tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Verification {
    pub id: String,
    /// What the token verifies, e.g. `reset-password:alice@test.com`
    pub identifier: String,
    #[serde(skip_serializing)]
    pub value_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
