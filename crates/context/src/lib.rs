//! Context assembly: turning unbounded conversation history into a
//! token-bounded prompt for a target LLM, honoring its `context_policy`.
//!
//! The engine's sole externally consumed entry point is
//! [`ContextEngine::assemble_context`]; everything else is internal
//! maintenance of state.

pub mod assembler;
pub mod engine;
pub mod tokenizer;

pub use {
    assembler::{AssembledContext, Assembler, AssemblyConfig, AssemblyWarning, ContextItem},
    engine::ContextEngine,
    tokenizer::{HeuristicTokenizer, Tokenizer},
};
