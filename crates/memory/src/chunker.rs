//! Pluggable chunking of a turn's lossless rendering.
//!
//! The default policy guarantees spans are contiguous, non-overlapping,
//! and together cover the full rendering — no silently dropped content.

/// Lossless, deterministic rendering of a turn's structured content.
/// String content renders as itself; any other JSON shape renders as
/// compact JSON. Chunk span offsets are character offsets into this text.
pub fn render_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One contiguous span of a rendering, with character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Boundary policy for splitting a rendering into embeddable spans.
pub trait Chunker: Send + Sync {
    /// Split `text` into spans. Implementations must keep spans contiguous,
    /// non-overlapping, and full-cover; an empty text yields no spans.
    fn chunk(&self, text: &str) -> Vec<ChunkSpan>;
}

/// Default chunker: fixed-width character windows split on `char`
/// boundaries.
#[derive(Debug, Clone)]
pub struct FixedWidthChunker {
    pub max_chars: usize,
}

impl Default for FixedWidthChunker {
    fn default() -> Self {
        Self { max_chars: 1200 }
    }
}

impl Chunker for FixedWidthChunker {
    fn chunk(&self, text: &str) -> Vec<ChunkSpan> {
        if text.is_empty() {
            return Vec::new();
        }
        let width = self.max_chars.max(1);
        let chars: Vec<char> = text.chars().collect();

        let mut spans = Vec::with_capacity(chars.len() / width + 1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + width).min(chars.len());
            spans.push(ChunkSpan {
                start,
                end,
                text: chars[start..end].iter().collect(),
            });
            start = end;
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_is_lossless() {
        assert_eq!(render_content(&serde_json::json!("hello")), "hello");

        let structured = serde_json::json!({"parts": [{"text": "hi"}]});
        let rendered = render_content(&structured);
        let back: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(back, structured);
    }

    #[test]
    fn spans_cover_exactly_with_no_overlap() {
        let chunker = FixedWidthChunker { max_chars: 4 };
        let text = "abcdefghij";
        let spans = chunker.chunk(text);

        assert_eq!(spans.len(), 3);
        let mut cursor = 0;
        let mut rebuilt = String::new();
        for span in &spans {
            assert_eq!(span.start, cursor);
            assert!(span.end > span.start);
            cursor = span.end;
            rebuilt.push_str(&span.text);
        }
        assert_eq!(cursor, text.chars().count());
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let chunker = FixedWidthChunker { max_chars: 2 };
        let text = "héllo wörld";
        let spans = chunker.chunk(text);
        let rebuilt: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn empty_text_yields_no_spans() {
        assert!(FixedWidthChunker::default().chunk("").is_empty());
    }

    #[test]
    fn short_text_is_one_span() {
        let spans = FixedWidthChunker::default().chunk("short");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 5);
    }
}
