//! Token counting is a collaborator, not something the engine computes:
//! stored `tokens_used` wins when present, and this trait estimates the
//! rest.

pub trait Tokenizer: Send + Sync {
    /// Estimated token count of `text` under the target model's tokenizer.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Default estimator: ~4 characters per token, never 0 for non-empty text.
#[derive(Debug, Clone)]
pub struct HeuristicTokenizer {
    pub chars_per_token: usize,
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        chars.div_ceil(self.chars_per_token.max(1))
    }
}
