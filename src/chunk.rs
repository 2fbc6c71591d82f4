//! Layered-separator text chunker.
//!
//! Splits text into overlapping [`Chunk`]s of at most `chunk_chars`
//! characters. Each cut is placed at the last paragraph break inside the
//! window, falling back to a line break, a sentence end, a space, and
//! finally a hard cut on a character boundary.
//!
//! Chunks are exact substrings of the input. The next chunk restarts
//! `overlap_chars` characters before the previous cut (moved forward to a
//! word start), so dropping each chunk's overlap with its predecessor
//! gives back the original text.
//!
//! Every chunk receives a SHA-256 hash of its content for provenance.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Break points, most preferred first.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ".", " "];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(chunk_chars: usize, overlap_chars: usize) -> Result<Self> {
        if chunk_chars == 0 {
            bail!("chunk size must be > 0");
        }
        if overlap_chars >= chunk_chars {
            bail!(
                "overlap ({}) must be smaller than chunk size ({})",
                overlap_chars,
                chunk_chars
            );
        }
        Ok(Self {
            chunk_chars,
            overlap_chars,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_chars, config.overlap_chars)
    }

    /// Split `text` into chunks, each carrying a copy of `metadata`.
    /// Empty text yields no chunks.
    pub fn split(&self, text: &str, metadata: &BTreeMap<String, String>) -> Vec<Chunk> {
        self.split_spans(text)
            .into_iter()
            .map(|span| make_chunk(&text[span], metadata))
            .collect()
    }

    /// Byte ranges of each chunk within `text`, in order.
    ///
    /// Consecutive spans overlap or touch (`next.start <= prev.end`) and
    /// both bounds strictly increase.
    pub fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let hard_end = advance_chars(text, start, self.chunk_chars);
            if hard_end == text.len() {
                spans.push(start..hard_end);
                break;
            }

            // A cut at or before this point could not move the next start forward.
            let min_end = advance_chars(text, start, self.overlap_chars + 1);
            let window = &text[start..hard_end];
            let end = SEPARATORS
                .iter()
                .find_map(|sep| {
                    window
                        .rfind(sep)
                        .map(|i| start + i + sep.len())
                        .filter(|&e| e > min_end)
                })
                .unwrap_or(hard_end);

            spans.push(start..end);
            start = next_start(text, end, self.overlap_chars);
        }

        spans
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_chars: 500,
            overlap_chars: 50,
        }
    }
}

/// Hex SHA-256 of a chunk's content.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(text: &str, metadata: &BTreeMap<String, String>) -> Chunk {
    Chunk {
        content: text.to_string(),
        metadata: metadata.clone(),
        hash: content_hash(text),
    }
}

/// Byte offset `n` characters after `from`, clamped to the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Start of the chunk following a cut at `end`: `overlap` characters back,
/// then forward past the next whitespace so the overlap begins on a word.
fn next_start(text: &str, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let back = text[..end]
        .char_indices()
        .rev()
        .nth(overlap - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);

    match text[back..end].char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((i, c)) => back + i + c.len_utf8(),
        None => end,
    }
}
