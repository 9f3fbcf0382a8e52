//! Randomized chunk sizing.
//!
//! Every transport call uses a fresh, word-aligned size drawn uniformly from
//! `[WORD_SIZE, max_chunk]` so that chunked protocols get exercised on odd
//! boundaries instead of a fixed block size.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Transport word granularity in bytes.
pub const WORD_SIZE: usize = 4;

/// Produces chunk sizes for one stream.
///
/// Each writer and reader owns its planner; the generator is not shared and
/// carries no correctness weight.
#[derive(Debug)]
pub struct ChunkPlanner {
    rng: StdRng,
    max_words: usize,
}

impl ChunkPlanner {
    /// Planner whose chunks never exceed `max_chunk` bytes.
    ///
    /// `max_chunk` is rounded down to a whole number of words, with a floor of
    /// one word.
    pub fn new(max_chunk: usize) -> Self {
        Self::with_rng(StdRng::from_entropy(), max_chunk)
    }

    /// Deterministic planner, for tests and reproducible runs.
    pub fn with_seed(seed: u64, max_chunk: usize) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), max_chunk)
    }

    fn with_rng(rng: StdRng, max_chunk: usize) -> Self {
        ChunkPlanner {
            rng,
            max_words: (max_chunk / WORD_SIZE).max(1),
        }
    }

    /// Upper bound of any size this planner returns.
    pub fn max_chunk(&self) -> usize {
        self.max_words * WORD_SIZE
    }

    /// Next chunk size: a multiple of `WORD_SIZE` in `[WORD_SIZE, max_chunk]`.
    pub fn next_chunk_size(&mut self) -> usize {
        self.rng.gen_range(1..=self.max_words) * WORD_SIZE
    }

    /// Next read size, clamped to what is still expected.
    ///
    /// The clamp can make the final read of a stream shorter than one word.
    pub fn next_read_size(&mut self, remaining: u64) -> usize {
        let size = self.next_chunk_size();
        if (size as u64) > remaining {
            remaining as usize
        } else {
            size
        }
    }
}
