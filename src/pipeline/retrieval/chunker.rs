/// Default window size for guideline chunks, in characters.
pub const CHUNK_CHARS: usize = 2200;
/// Characters shared between consecutive chunks.
pub const CHUNK_OVERLAP_CHARS: usize = 200;
/// A sentence end is only used as the cut point if it falls in the last 30%
/// of the window.
const MIN_CUT_FRACTION: f32 = 0.7;

/// Fixed-window chunker for guideline documents. Collapses whitespace, then
/// cuts windows at the last sentence end when one is close to the window edge.
#[derive(Debug, Clone, Copy)]
pub struct GuidelineChunker {
    chunk_chars: usize,
    overlap_chars: usize,
}

impl GuidelineChunker {
    pub fn new() -> Self {
        Self::with_sizes(CHUNK_CHARS, CHUNK_OVERLAP_CHARS)
    }

    /// Window and overlap in characters. Overlap is clamped below the window.
    pub fn with_sizes(chunk_chars: usize, overlap_chars: usize) -> Self {
        let chunk_chars = chunk_chars.max(1);
        Self {
            chunk_chars,
            overlap_chars: overlap_chars.min(chunk_chars - 1),
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let collapsed: Vec<char> = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .collect();
        let n = collapsed.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < n {
            let mut end = (start + self.chunk_chars).min(n);
            let window = &collapsed[start..end];
            if let Some(cut) = last_sentence_end(window) {
                if cut as f32 > MIN_CUT_FRACTION * window.len() as f32 {
                    end = start + cut + 1;
                }
            }

            let chunk: String = collapsed[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            if end == n {
                break;
            }

            let next = end.saturating_sub(self.overlap_chars);
            start = if next > start { next } else { end };
        }

        chunks
    }
}

impl Default for GuidelineChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the last `.`, `?` or `!` followed by a space inside the window.
fn last_sentence_end(window: &[char]) -> Option<usize> {
    window
        .windows(2)
        .rposition(|pair| matches!(pair[0], '.' | '?' | '!') && pair[1] == ' ')
}
