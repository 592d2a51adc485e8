//! Catalog of LLM backends and their context policies/limits.
//!
//! The registry is read on every context-assembly call, so reads are served
//! from an in-process cache invalidated explicitly on write — never polled.

pub mod store;

use serde::{Deserialize, Serialize};

pub use store::{NewLlm, Registry};

/// Which party bounds the context sent to an LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextPolicy {
    /// The remote model manages its own context; the engine sends full
    /// history verbatim.
    Model,
    /// The engine alone enforces the token budget.
    App,
    /// The engine pre-filters but caps below the full budget, leaving
    /// headroom for the model's own truncation.
    Hybrid,
    /// Context assembly is delegated to an outside collaborator; the
    /// engine only persists turns.
    External,
}

impl ContextPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::App => "app",
            Self::Hybrid => "hybrid",
            Self::External => "external",
        }
    }
}

impl std::str::FromStr for ContextPolicy {
    type Err = orac_common::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(Self::Model),
            "app" => Ok(Self::App),
            "hybrid" => Ok(Self::Hybrid),
            "external" => Ok(Self::External),
            other => Err(orac_common::EngineError::InvalidInput(format!(
                "unknown context policy: {other}"
            ))),
        }
    }
}

/// A registered LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDefinition {
    pub id: String,
    /// Unique registry key.
    pub name: String,
    pub provider: String,
    /// Provider-side model identifier (e.g. "gpt-4o", "llama3:70b").
    pub model: String,
    pub context_policy: ContextPolicy,
    /// None means unbounded/unknown.
    pub max_context_tokens: Option<i64>,
    pub enabled: bool,
    /// Provider-specific settings, opaque to the engine.
    pub properties: serde_json::Value,
    #[serde(flatten)]
    pub audit: orac_common::Audit,
}

/// Fields a `Registry::update` may change. `None` leaves the field as-is;
/// `max_context_tokens` uses a nested Option so it can be set to null.
#[derive(Debug, Clone, Default)]
pub struct LlmPatch {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub context_policy: Option<ContextPolicy>,
    pub max_context_tokens: Option<Option<i64>>,
    pub enabled: Option<bool>,
    pub properties: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_round_trips_through_str() {
        for p in [
            ContextPolicy::Model,
            ContextPolicy::App,
            ContextPolicy::Hybrid,
            ContextPolicy::External,
        ] {
            assert_eq!(p.as_str().parse::<ContextPolicy>().unwrap(), p);
        }
        assert!("oracle".parse::<ContextPolicy>().is_err());
    }
}
