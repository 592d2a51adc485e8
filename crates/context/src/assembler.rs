//! The context-assembly algorithm.
//!
//! Each `context_policy` is one arm of a single exhaustive match: the
//! variants are short and independent, so dispatching once per call is
//! clearer than polymorphic delegation.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::{debug, warn};

use {
    crate::tokenizer::Tokenizer,
    orac_common::EngineResult,
    orac_memory::{ChunkStore, EmbeddingChunk, Indexer, SearchFilter, render_content},
    orac_registry::{ContextPolicy, LlmDefinition},
    orac_sessions::{Turn, TurnStore},
};

/// One element of an assembled context, in presentation order.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextItem {
    Turn(Turn),
    /// A retrieved span standing in for an older turn that did not fit.
    Chunk { chunk: EmbeddingChunk, score: f32 },
    /// The degenerate-budget fallback: the most recent turn cut down to
    /// the budget. Always accompanied by `AssemblyWarning::BudgetTooSmall`.
    Truncated { turn: Turn, text: String },
}

/// Non-fatal diagnostics carried alongside a best-effort result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyWarning {
    /// `app`/`hybrid` with a null `max_context_tokens`: degraded to
    /// `model` behavior (full history).
    UnboundedBudget,
    /// No turn or retrieved chunk fit even singly; the result is a single
    /// truncated turn.
    BudgetTooSmall,
    /// The query embedding failed; assembly fell back to recency only.
    RetrievalUnavailable,
}

#[derive(Debug, serde::Serialize)]
pub struct AssembledContext {
    pub session: String,
    pub items: Vec<ContextItem>,
    pub warnings: Vec<AssemblyWarning>,
}

impl AssembledContext {
    pub fn is_flagged(&self, warning: AssemblyWarning) -> bool {
        self.warnings.contains(&warning)
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// k for top-k chunk retrieval.
    pub top_k: usize,
    /// Fraction of the budget usable under `hybrid`.
    pub hybrid_headroom: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            hybrid_headroom: 0.8,
        }
    }
}

pub struct Assembler {
    turns: Arc<TurnStore>,
    chunks: Arc<dyn ChunkStore>,
    indexer: Arc<Indexer>,
    tokenizer: Arc<dyn Tokenizer>,
    config: AssemblyConfig,
}

impl Assembler {
    pub fn new(
        turns: Arc<TurnStore>,
        chunks: Arc<dyn ChunkStore>,
        indexer: Arc<Indexer>,
        tokenizer: Arc<dyn Tokenizer>,
        config: AssemblyConfig,
    ) -> Self {
        Self {
            turns,
            chunks,
            indexer,
            tokenizer,
            config,
        }
    }

    /// Produce the bounded context for answering `new_turn` on `session`
    /// with the given LLM. Read-only and side-effect-free.
    pub async fn assemble(
        &self,
        llm: &LlmDefinition,
        session: &str,
        new_turn: &Turn,
    ) -> EngineResult<AssembledContext> {
        match llm.context_policy {
            ContextPolicy::External => {
                // Context is a collaborator's problem; hand back only the
                // new turn and the session identifier.
                Ok(AssembledContext {
                    session: session.to_string(),
                    items: vec![ContextItem::Turn(new_turn.clone())],
                    warnings: Vec::new(),
                })
            },
            ContextPolicy::Model => {
                let history = self.turns.history(session, None, None).await?;
                Ok(AssembledContext {
                    session: session.to_string(),
                    items: history.into_iter().map(ContextItem::Turn).collect(),
                    warnings: Vec::new(),
                })
            },
            ContextPolicy::App => {
                self.assemble_bounded(llm, session, new_turn, llm.max_context_tokens)
                    .await
            },
            ContextPolicy::Hybrid => {
                let capped = llm
                    .max_context_tokens
                    .map(|b| (b as f64 * self.config.hybrid_headroom).floor() as i64);
                self.assemble_bounded(llm, session, new_turn, capped).await
            },
        }
    }

    /// `app`/`hybrid` shared path: recency window under the budget, then
    /// retrieved chunks for what fell off, most-similar first under the
    /// same running budget. Recent turns always beat retrieved chunks.
    async fn assemble_bounded(
        &self,
        llm: &LlmDefinition,
        session: &str,
        new_turn: &Turn,
        budget: Option<i64>,
    ) -> EngineResult<AssembledContext> {
        let history = self.turns.history(session, None, None).await?;

        let Some(budget) = budget else {
            warn!(llm = %llm.name, "max_context_tokens unset, returning full history");
            return Ok(AssembledContext {
                session: session.to_string(),
                items: history.into_iter().map(ContextItem::Turn).collect(),
                warnings: vec![AssemblyWarning::UnboundedBudget],
            });
        };

        // The new turn is the retrieval query, not a context item; skip it
        // if the caller already appended it.
        let history: Vec<Turn> = history.into_iter().filter(|t| t.id != new_turn.id).collect();
        if history.is_empty() {
            return Ok(AssembledContext {
                session: session.to_string(),
                items: Vec::new(),
                warnings: Vec::new(),
            });
        }

        // Walk backward from the most recent turn; the window stays
        // contiguous, so the first turn that would exceed the budget ends
        // it and everything older becomes retrieval material.
        let mut remaining = budget;
        let mut window: Vec<Turn> = Vec::new();
        let mut dropped: Vec<&Turn> = Vec::new();
        let mut older = history.iter().rev();
        for turn in older.by_ref() {
            let cost = self.turn_cost(turn);
            if cost > remaining {
                dropped.push(turn);
                break;
            }
            remaining -= cost;
            window.push(turn.clone());
        }
        dropped.extend(older);
        window.reverse();

        let mut warnings = Vec::new();
        let mut retrieved: Vec<(i64, SearchHitLite)> = Vec::new();

        if !dropped.is_empty() && remaining > 0 {
            match self
                .retrieve_for_dropped(session, new_turn, &window, remaining)
                .await
            {
                Ok(hits) => retrieved = hits,
                Err(e) => {
                    // Query-time embedding failure degrades to recency-only.
                    warn!(error = %e, "query embedding failed, skipping retrieval");
                    warnings.push(AssemblyWarning::RetrievalUnavailable);
                },
            }
        }

        if window.is_empty() && retrieved.is_empty() {
            // Nothing fits, not even a retrieved chunk: truncate the most
            // recent turn rather than return an empty context silently.
            let last = history[history.len() - 1].clone();
            let text = self.truncate_to_budget(&render_content(&last.content), budget);
            warn!(llm = %llm.name, session, budget, "budget too small for any turn or chunk");
            warnings.push(AssemblyWarning::BudgetTooSmall);
            return Ok(AssembledContext {
                session: session.to_string(),
                items: vec![ContextItem::Truncated { turn: last, text }],
                warnings,
            });
        }

        // Presentation is conversational: substituted chunks (in turn
        // order) ahead of the recent window.
        let turn_order: HashMap<&str, i64> = history
            .iter()
            .map(|t| (t.id.as_str(), t.turn_index))
            .collect();
        retrieved.sort_by_key(|(chunk_index, hit)| {
            (
                turn_order.get(hit.chunk.turn_id.as_str()).copied().unwrap_or(i64::MAX),
                *chunk_index,
            )
        });

        let mut items: Vec<ContextItem> = retrieved
            .into_iter()
            .map(|(_, hit)| ContextItem::Chunk {
                chunk: hit.chunk,
                score: hit.score,
            })
            .collect();
        items.extend(window.into_iter().map(ContextItem::Turn));

        debug!(llm = %llm.name, session, budget, items = items.len(), "assembled context");
        Ok(AssembledContext {
            session: session.to_string(),
            items,
            warnings,
        })
    }

    /// Top-k retrieval for the turns that fell off the window, charged
    /// against the remaining budget most-similar first.
    async fn retrieve_for_dropped(
        &self,
        session: &str,
        new_turn: &Turn,
        window: &[Turn],
        mut remaining: i64,
    ) -> EngineResult<Vec<(i64, SearchHitLite)>> {
        let query_text = render_content(&new_turn.content);
        let query = self.indexer.embed_query(&query_text).await?;
        let metric = self.indexer.provider().metric();

        let filter = SearchFilter {
            session: Some(session.to_string()),
            user_id: None,
        };
        let hits = self
            .chunks
            .search(&query, metric, self.config.top_k, &filter)
            .await?;

        let in_window: HashSet<&str> = window.iter().map(|t| t.id.as_str()).collect();
        let mut selected = Vec::new();
        for hit in hits {
            if in_window.contains(hit.chunk.turn_id.as_str())
                || hit.chunk.turn_id == new_turn.id
            {
                continue;
            }
            let cost = self.tokenizer.count_tokens(&hit.chunk.lossless_text) as i64;
            if cost > remaining {
                continue;
            }
            remaining -= cost;
            selected.push((
                hit.chunk.chunk_index,
                SearchHitLite {
                    chunk: hit.chunk,
                    score: hit.score,
                },
            ));
        }
        Ok(selected)
    }

    fn turn_cost(&self, turn: &Turn) -> i64 {
        turn.tokens_used
            .unwrap_or_else(|| self.tokenizer.count_tokens(&render_content(&turn.content)) as i64)
    }

    /// Longest character prefix whose token estimate fits the budget.
    fn truncate_to_budget(&self, text: &str, budget: i64) -> String {
        let budget = budget.max(0) as usize;
        let chars: Vec<char> = text.chars().collect();
        let (mut lo, mut hi) = (0usize, chars.len());
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            let prefix: String = chars[..mid].iter().collect();
            if self.tokenizer.count_tokens(&prefix) <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        chars[..lo].iter().collect()
    }
}

struct SearchHitLite {
    chunk: EmbeddingChunk,
    score: f32,
}
