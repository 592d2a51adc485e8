//! The versioned-record audit pattern shared by every mutable entity:
//! `{created_on, created_by, updated_on, updated_by}` plus a `row_version`
//! that increments by exactly 1 on every successful update and backs the
//! optimistic-concurrency contract.

use {
    serde::{Deserialize, Serialize},
    std::time::{SystemTime, UNIX_EPOCH},
};

use crate::ActorId;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Audit quadruplet + row version carried by every mutable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_on: i64,
    pub created_by: String,
    pub updated_on: i64,
    pub updated_by: String,
    /// Starts at 1; callers must echo the version they observed on update.
    pub row_version: i64,
}

impl Audit {
    /// Fresh audit state for a newly created record.
    pub fn new(actor: &ActorId) -> Self {
        let now = now_ms();
        Self {
            created_on: now,
            created_by: actor.0.clone(),
            updated_on: now,
            updated_by: actor.0.clone(),
            row_version: 1,
        }
    }
}
