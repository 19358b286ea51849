use medrag_core::RetrievalConfig;
use semchunk_rs::Chunker;
use serde::{Deserialize, Serialize};

/// Characters per token used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Chunk size and overlap, in approximate tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingPolicy {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 10,
        }
    }
}

impl From<&RetrievalConfig> for ChunkingPolicy {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// Splits text into chunks of at most `chunk_size` estimated tokens and
/// carries the trailing words of each chunk into the next one.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    policy: ChunkingPolicy,
}

impl SentenceSplitter {
    pub fn new(policy: ChunkingPolicy) -> Self {
        let chunk_size = policy.chunk_size.max(1);
        Self {
            policy: ChunkingPolicy {
                chunk_size,
                chunk_overlap: policy.chunk_overlap.min(chunk_size - 1),
            },
        }
    }

    pub fn policy(&self) -> ChunkingPolicy {
        self.policy
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let size = self.policy.chunk_size;
        // Leave room for the carried words
        let chunker = Chunker::new(size - self.policy.chunk_overlap, Box::new(estimate_tokens));

        let mut chunks: Vec<String> = Vec::new();
        for chunk in chunker.chunk(text) {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }

            let overlap = chunks
                .last()
                .map(|previous| self.overlap_tail(previous))
                .unwrap_or_default();
            if !overlap.is_empty() && estimate_tokens(&overlap) + 1 + estimate_tokens(chunk) <= size
            {
                chunks.push(format!("{} {}", overlap, chunk));
            } else {
                chunks.push(chunk.to_string());
            }
        }
        chunks
    }

    /// Trailing words of `chunk` totalling at most `chunk_overlap` tokens.
    fn overlap_tail(&self, chunk: &str) -> String {
        if self.policy.chunk_overlap == 0 {
            return String::new();
        }

        let mut budget = self.policy.chunk_overlap;
        let mut tail: Vec<&str> = Vec::new();
        for word in chunk.split_whitespace().rev() {
            let cost = estimate_tokens(word) + usize::from(!tail.is_empty());
            if cost > budget {
                break;
            }
            budget -= cost;
            tail.push(word);
        }
        tail.reverse();
        tail.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> SentenceSplitter {
        SentenceSplitter::new(ChunkingPolicy {
            chunk_size,
            chunk_overlap,
        })
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = SentenceSplitter::new(ChunkingPolicy::default())
            .split("Losartan is taken once daily.\n\nIt may cause dizziness.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("\n\n"));
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(splitter(10, 2).split("   \n\n ").is_empty());
    }

    #[test]
    fn chunks_respect_the_size_bound() {
        let text = "The tablet should be swallowed whole with water. \
                    Do not crush or chew the tablet. \
                    Take it at the same time every day. \
                    If you miss a dose take it as soon as you remember. "
            .repeat(10);
        let splitter = splitter(20, 3);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 20, "oversized chunk: {chunk}");
        }
    }

    #[test]
    fn overlap_carries_trailing_words() {
        let splitter = splitter(10, 2);
        let chunks = splitter.split("alpha beta gamma delta. epsilon zeta eta theta.");
        assert_eq!(chunks.len(), 2);
        let carried = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[1].starts_with(carried), "{chunks:?}");
        assert!(chunks[1].ends_with("theta."));
    }

    #[test]
    fn oversized_words_are_cut() {
        let word = "x".repeat(50);
        let chunks = splitter(5, 0).split(&word);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| estimate_tokens(c) <= 5));
        assert_eq!(chunks.concat(), word);
    }

    #[test]
    fn overlap_is_clamped_below_chunk_size() {
        let splitter = splitter(4, 9);
        assert_eq!(splitter.policy().chunk_overlap, 3);
        let chunks = splitter.split("one two three four five six seven eight nine ten");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| estimate_tokens(c) <= 4));
    }
}
