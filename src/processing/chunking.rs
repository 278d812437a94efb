//! Deterministic sliding-window chunking with stable character offsets.
//!
//! Highlights:
//!
//! - Fixed-size windows: each chunk covers up to `chunk_size` characters of
//!   the normalized text; consecutive chunks overlap by up to
//!   `chunk_overlap` characters.
//! - Word boundaries: a chunk end backs up to the nearest whitespace within
//!   the overlap window, and the next chunk start advances to the following
//!   word start, so words are not split when the text has any spacing. The
//!   adjustment only ever shrinks the overlap, never grows it.
//! - Stable offsets: every chunk records its character range into the
//!   normalized text, and identical input with identical parameters always
//!   produces the identical chunk sequence.

use super::types::{Chunk, ChunkingError};

/// Split normalized text into overlapping chunks covering the whole input.
///
/// Offsets are character positions; `chunk_overlap` must be strictly below
/// `chunk_size`. Fails with [`ChunkingError::EmptyInput`] when the text is
/// empty or whitespace-only.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            chunk_size,
            chunk_overlap,
        });
    }
    if text.trim().is_empty() {
        return Err(ChunkingError::EmptyInput);
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    let byte_at = |char_idx: usize| {
        if char_idx >= total {
            text.len()
        } else {
            chars[char_idx].0
        }
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < total {
        let raw_end = (start + chunk_size).min(total);
        let end = if raw_end < total {
            adjust_end(&chars, start, raw_end, chunk_overlap)
        } else {
            raw_end
        };

        chunks.push(Chunk {
            document_id: document_id.to_string(),
            index,
            start,
            end,
            text: text[byte_at(start)..byte_at(end)].to_string(),
        });
        index += 1;

        if end == total {
            break;
        }

        let mut next = adjust_start(&chars, end.saturating_sub(chunk_overlap), end);
        if next <= start {
            // Forward progress even for pathological unbroken text.
            next = start + 1;
        }
        start = next;
    }

    Ok(chunks)
}

/// Back the chunk end up to just after the nearest whitespace, searching at
/// most `chunk_overlap` characters so the chunk stays near its target size.
fn adjust_end(chars: &[(usize, char)], start: usize, raw_end: usize, chunk_overlap: usize) -> usize {
    let window_start = raw_end.saturating_sub(chunk_overlap).max(start + 1);
    let mut end = raw_end;
    while end > window_start {
        if chars[end - 1].1.is_whitespace() {
            return end;
        }
        end -= 1;
    }
    raw_end
}

/// Advance the proposed start to the next word start before `end`, shrinking
/// the overlap rather than beginning mid-word. Falls back to the proposal
/// when no boundary exists in the window.
fn adjust_start(chars: &[(usize, char)], proposed: usize, end: usize) -> usize {
    if proposed == 0 || chars[proposed - 1].1.is_whitespace() {
        return proposed;
    }
    let mut i = proposed;
    while i < end {
        if chars[i].1.is_whitespace() {
            let mut j = i + 1;
            while j < end && chars[j].1.is_whitespace() {
                j += 1;
            }
            return j;
        }
        i += 1;
    }
    proposed
}

/// Rebuild the normalized text from an ordered chunk sequence, dropping the
/// overlapping prefix of each chunk.
pub fn reconstruct_text(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        if chunk.end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = chunk.end;
    }
    out
}
