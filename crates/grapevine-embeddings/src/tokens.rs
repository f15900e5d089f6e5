// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token counting and token-aware text chunking.
//!
//! Counting uses the cl100k BPE when available and falls back to a
//! 4-chars-per-token heuristic. Chunk boundaries always sit on whitespace
//! boundaries of the original text, so every chunk is a literal slice and
//! consecutive chunks overlap by a literal suffix/prefix.

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// A chunk of the original text with its char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
}

/// Token counter with a character heuristic fallback.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "cl100k tokenizer unavailable, using char heuristic");
                None
            }
        };
        Self { bpe }
    }

    /// Counter that always uses the 4-chars-per-token heuristic (tests).
    pub fn heuristic_only() -> Self {
        Self { bpe: None }
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    /// Split `text` into chunks of at most `max_tokens` tokens with
    /// `overlap_tokens` of trailing context repeated at each boundary.
    ///
    /// The chunks cover the whole text in order. A single whitespace-free
    /// run longer than `max_tokens` becomes its own oversized chunk rather
    /// than being split mid-word.
    pub fn chunk_text(
        &self,
        text: &str,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let max_tokens = max_tokens.max(1);
        let overlap_tokens = overlap_tokens.min(max_tokens.saturating_sub(1));

        let total_chars = text.chars().count();
        if self.count(text) <= max_tokens {
            return vec![TextChunk {
                text: text.to_string(),
                start_char: 0,
                end_char: total_chars,
            }];
        }

        let segments = split_segments(text);
        let tokens: Vec<usize> = segments
            .iter()
            .map(|s| self.count(&text[s.byte_start..s.byte_end]))
            .collect();

        let mut chunks = Vec::new();
        let mut i = 0;
        while i < segments.len() {
            let mut j = i;
            let mut used = 0usize;
            while j < segments.len() {
                if j > i && used + tokens[j] > max_tokens {
                    break;
                }
                used += tokens[j];
                j += 1;
            }

            let start = &segments[i];
            let end = &segments[j - 1];
            chunks.push(TextChunk {
                text: text[start.byte_start..end.byte_end].to_string(),
                start_char: start.char_start,
                end_char: end.char_end,
            });

            if j >= segments.len() {
                break;
            }

            // Walk back over the tail to build the overlap zone, always
            // leaving at least one fresh segment of forward progress.
            let mut k = j;
            let mut overlap_used = 0usize;
            while k > i + 1 && overlap_used + tokens[k - 1] <= overlap_tokens {
                overlap_used += tokens[k - 1];
                k -= 1;
            }
            i = k;
        }
        chunks
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

struct Segment {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

/// Split into "word plus trailing whitespace" runs covering the text.
fn split_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut seg_byte = 0usize;
    let mut seg_char = 0usize;
    let mut char_idx = 0usize;
    let mut prev_was_ws = false;

    for (byte_idx, ch) in text.char_indices() {
        if !ch.is_whitespace() && prev_was_ws && byte_idx > seg_byte {
            segments.push(Segment {
                byte_start: seg_byte,
                byte_end: byte_idx,
                char_start: seg_char,
                char_end: char_idx,
            });
            seg_byte = byte_idx;
            seg_char = char_idx;
        }
        prev_was_ws = ch.is_whitespace();
        char_idx += 1;
    }
    segments.push(Segment {
        byte_start: seg_byte,
        byte_end: text.len(),
        char_start: seg_char,
        char_end: char_idx,
    });
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the original text from chunks by stripping each chunk's
    /// overlap region (the part before the previous chunk's end).
    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut out = String::new();
        let mut prev_end = 0usize;
        for chunk in chunks {
            let skip = prev_end.saturating_sub(chunk.start_char);
            out.extend(chunk.text.chars().skip(skip));
            prev_end = chunk.end_char;
        }
        out
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let counter = TokenCounter::heuristic_only();
        let chunks = counter.chunk_text("hello world", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 11);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let counter = TokenCounter::heuristic_only();
        assert!(counter.chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn chunks_cover_the_whole_text() {
        let counter = TokenCounter::heuristic_only();
        let text = (0..200)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = counter.chunk_text(&text, 50, 10);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks.last().unwrap().end_char, text.chars().count());
        for window in chunks.windows(2) {
            assert!(
                window[1].start_char <= window[0].end_char,
                "chunks must abut or overlap"
            );
            assert!(
                window[1].start_char > window[0].start_char,
                "chunks must make forward progress"
            );
        }
    }

    #[test]
    fn roundtrip_reconstructs_original() {
        let counter = TokenCounter::heuristic_only();
        let text = "Практические новости искусственного интеллекта выходят каждый день, \
            и подписчики каналов ждут краткие выжимки с тегами."
            .repeat(8);
        let chunks = counter.chunk_text(&text, 40, 8);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn chunk_sizes_respect_the_budget() {
        let counter = TokenCounter::heuristic_only();
        let text = (0..300)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = counter.chunk_text(&text, 30, 5);
        for chunk in &chunks {
            assert!(
                counter.count(&chunk.text) <= 30 + 2,
                "chunk of {} tokens exceeds budget",
                counter.count(&chunk.text)
            );
        }
    }

    #[test]
    fn oversized_single_word_becomes_its_own_chunk() {
        let counter = TokenCounter::heuristic_only();
        let text = format!("{} tail", "x".repeat(400));
        let chunks = counter.chunk_text(&text, 20, 5);
        assert_eq!(chunks[0].text.trim_end(), "x".repeat(400));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn overlap_is_clamped_below_max() {
        let counter = TokenCounter::heuristic_only();
        let text = (0..100)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        // overlap >= max_tokens would never advance; the clamp keeps it sane.
        let chunks = counter.chunk_text(&text, 10, 10);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn heuristic_counts_four_chars_per_token() {
        let counter = TokenCounter::heuristic_only();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }
}
