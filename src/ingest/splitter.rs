//! Recursive character splitter.
//!
//! Splits on the coarsest separator present (`"\n\n"`, `"\n"`, `" "`, then
//! single characters), recursing into pieces that are still too long, and
//! greedily merges neighbouring pieces back up to `chunk_size` characters
//! with up to `chunk_overlap` characters carried into the next chunk.
use std::collections::VecDeque;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator that occurs in the text
        let (separator, rest) = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .map(|i| (separators[i], &separators[i + 1..]))
            .unwrap_or(("", &[][..]));

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if rest.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, rest));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }
        chunks
    }

    /// Greedily join `pieces` with `separator` into chunks of at most `chunk_size`.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined_len = |window: &VecDeque<_>, total| {
                total + len + if window.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&window, total) > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window, separator);

                // Drop from the front until what remains fits as overlap
                while total > self.chunk_overlap
                    || (total > 0 && joined_len(&window, total) > self.chunk_size)
                {
                    let Some((_, front_len)) = window.pop_front() else {
                        break;
                    };
                    total -= front_len + if window.is_empty() { 0 } else { sep_len };
                }
            }

            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push_back((piece, len));
        }

        push_joined(&mut chunks, &window, separator);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>, separator: &str) {
    let joined = window
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
