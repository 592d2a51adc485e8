//! The turn store: an append-only, ordered conversation log per session,
//! plus the users and preferences that own it.
//!
//! Turn order is never inferred from wall-clock time — only from the
//! explicit `turn_index`, unique and strictly increasing per session.

pub mod store;
pub mod users;

use serde::{Deserialize, Serialize};

pub use {
    store::{NewTurn, SessionSummary, TurnStore},
    users::{Preference, User, UserStore},
};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = orac_common::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(orac_common::EngineError::InvalidInput(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

/// One message in a conversation.
///
/// `content` is a structured document rather than free text so a turn can
/// carry multi-part messages (text, tool calls, attachments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub user_id: String,
    /// Registry entry this turn was addressed to, if any.
    pub llm_id: Option<String>,
    /// Opaque session key.
    pub session: String,
    /// Strictly increasing within the session; the canonical order.
    pub turn_index: i64,
    pub role: Role,
    pub content: serde_json::Value,
    /// Precomputed token count under some tokenizer, when known.
    pub tokens_used: Option<i64>,
    /// Arbitrary diagnostic data.
    pub meta: serde_json::Value,
    #[serde(flatten)]
    pub audit: orac_common::Audit,
}

/// Corrective-edit patch for a turn. `session` and `turn_index` are not
/// patchable; a turn never moves.
#[derive(Debug, Clone, Default)]
pub struct TurnPatch {
    pub content: Option<serde_json::Value>,
    pub tokens_used: Option<Option<i64>>,
    pub meta: Option<serde_json::Value>,
}
