//! Word pool the session draws typing prompts from.
//!
//! The source is an injected capability rather than a process-wide global
//! so tests can substitute a deterministic sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::Path;

/// Supplies the next word a player must type, given the word they just
/// cleared. Implementations live inside the session's shared state, hence
/// the `Send + Sync` bound.
pub trait WordSource: Send + Sync {
    fn next_word(&mut self, prev: &str) -> String;
}

/// Uniform random draws from a fixed word list.
pub struct WordList {
    words: Vec<String>,
    rng: StdRng,
}

/// Fallback pool used when no word file is supplied.
const BUILTIN_WORDS: &[&str] = &[
    "apple", "orange", "stub", "mock", "ferris", "cargo", "crate", "module",
];

impl WordList {
    pub fn new(words: Vec<String>) -> Self {
        assert!(!words.is_empty(), "word list must not be empty");
        Self {
            words,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(words: Vec<String>, seed: u64) -> Self {
        assert!(!words.is_empty(), "word list must not be empty");
        Self {
            words,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Loads one word per line, skipping blanks.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let words: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if words.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no words in {}", path.display()),
            ));
        }

        Ok(Self::new(words))
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_WORDS.iter().map(|w| w.to_string()).collect())
    }
}

impl WordSource for WordList {
    fn next_word(&mut self, prev: &str) -> String {
        let idx = self.rng.gen_range(0..self.words.len());
        let word = &self.words[idx];

        // Redraw once so back-to-back prompts differ when possible.
        if word == prev && self.words.len() > 1 {
            let retry = self.rng.gen_range(0..self.words.len());
            if self.words[retry] != prev {
                return self.words[retry].clone();
            }
        }

        word.clone()
    }
}
