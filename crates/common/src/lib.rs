//! Shared types for the orac context engine: the error taxonomy, the
//! versioned-record audit pattern, explicit caller identity, and the
//! SQLite pool constructor every store crate builds on.

pub mod audit;
pub mod db;
pub mod error;

pub use {
    audit::{Audit, now_ms},
    error::{EngineError, EngineResult},
};

/// Identity of the caller performing a mutation, carried explicitly through
/// every write path. `created_by`/`updated_by` are resolved from this, never
/// from process-global state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generate a fresh v4 UUID string id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
