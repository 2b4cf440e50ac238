//! Chunker (spec §4.2): splits source text into non-overlapping,
//! sentence-boundary-respecting [`TextChunk`]s that preserve the original
//! document's character offsets.

use crate::types::TextChunk;
use text_splitter::TextSplitter;

/// Splits text into chunks of at most `max_chunk_size` characters.
pub struct Chunker {
    max_chunk_size: usize,
    preserve_sentences: bool,
}

impl Chunker {
    #[must_use]
    pub const fn new(max_chunk_size: usize, preserve_sentences: bool) -> Self {
        Self {
            max_chunk_size,
            preserve_sentences,
        }
    }

    /// Splits `text` into dense, 0-indexed, non-overlapping chunks. Empty
    /// text yields `[]` (spec §4.2, §8 scenario 5).
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let pieces: Vec<&str> = if self.preserve_sentences {
            let splitter = TextSplitter::new(self.max_chunk_size);
            splitter.chunks(text).collect()
        } else {
            character_chunks(text, self.max_chunk_size)
        };

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut offset = 0usize;
        for (index, piece) in pieces.into_iter().enumerate() {
            let char_len = piece.chars().count();
            chunks.push(TextChunk {
                index,
                text: piece.to_string(),
                start_offset: offset,
                end_offset: offset + char_len,
            });
            offset += char_len;
        }
        chunks
    }
}

/// Fixed-size character chunking for the `preserveSentences = false` path:
/// splits at exactly `max_chunk_size` characters regardless of sentence
/// boundaries, still non-overlapping and contiguous.
fn character_chunks(text: &str, max_chunk_size: usize) -> Vec<&str> {
    let max_chunk_size = max_chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (byte_idx, _) in text.char_indices() {
        if count == max_chunk_size {
            chunks.push(&text[start..byte_idx]);
            start = byte_idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::new(100, true);
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn chunks_are_dense_and_offsets_are_exact() {
        let chunker = Chunker::new(20, true);
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = chunker.chunk(text);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(
                chunk.end_offset - chunk.start_offset,
                chunk.text.chars().count()
            );
        }

        let reassembled: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(reassembled, text);
    }

    #[test]
    fn single_short_chunk_when_under_limit() {
        let chunker = Chunker::new(1000, true);
        let text = "This is a short document. It should not be chunked.";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, text.chars().count());
    }

    #[test]
    fn offsets_are_contiguous_across_chunk_boundaries() {
        let chunker = Chunker::new(15, false);
        let text = "0123456789abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            assert_eq!(window[0].end_offset, window[1].start_offset);
        }
        let reassembled: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(reassembled, text);
    }
}
