//! Phonetic transcript correction against a dynamic vocabulary
//!
//! Speech-to-text regularly mangles device and room names ("deckenleute"
//! instead of "deckenleuchte"). The sanitizer slides token windows of 3, 2
//! and 1 words over the transcript, scores each window against every known
//! vocabulary phrase with a character-trigram Sørensen–Dice coefficient and
//! substitutes the best phrase when it clears the threshold.

use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock};

/// Default similarity a window must reach to be replaced
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Default minimum length (in characters) of a vocabulary entry
pub const DEFAULT_MIN_WORD_LEN: usize = 4;

/// Window sizes tried at every position, largest first
const WINDOW_SIZES: [usize; 3] = [3, 2, 1];

/// Trigram-based transcript sanitizer
///
/// The vocabulary is kept ordered so that ties between equally scoring
/// phrases always resolve the same way.
#[derive(Debug)]
pub struct Sanitizer {
    threshold: f64,
    min_word_len: usize,
    vocabulary: RwLock<BTreeSet<String>>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_WORD_LEN)
    }
}

impl Sanitizer {
    /// Create a sanitizer with an empty vocabulary
    #[must_use]
    pub fn new(threshold: f64, min_word_len: usize) -> Self {
        Self {
            threshold,
            min_word_len,
            vocabulary: RwLock::new(BTreeSet::new()),
        }
    }

    /// Add phrases to the vocabulary
    ///
    /// Entries are lower-cased and trimmed; anything shorter than the
    /// configured minimum length is ignored.
    pub fn extend_vocabulary<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = self
            .vocabulary
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for word in words {
            let word = word.as_ref().trim().to_lowercase();
            if word.chars().count() >= self.min_word_len {
                vocabulary.insert(word);
            }
        }
    }

    /// Replace the whole vocabulary (used on refresh from the device gateway)
    pub fn replace_vocabulary<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vocabulary
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.extend_vocabulary(words);
    }

    /// Number of phrases currently known
    #[must_use]
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Correct phonetic mistakes in a transcript
    ///
    /// The output is lower-cased and whitespace-normalized. At each token
    /// position the best match over all window sizes wins; on a match the
    /// scan skips past the consumed tokens, otherwise the single token is
    /// kept as-is.
    #[must_use]
    pub fn sanitize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();

        let vocabulary = self
            .vocabulary
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if vocabulary.is_empty() {
            return tokens.join(" ");
        }

        let mut output: Vec<&str> = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let mut best: Option<(f64, &str, usize)> = None;

            for size in WINDOW_SIZES {
                if i + size > tokens.len() {
                    continue;
                }
                let window = tokens[i..i + size].join(" ");

                for phrase in vocabulary.iter() {
                    let score = dice_coefficient(&window, phrase);
                    if best.is_none_or(|(top, _, _)| score > top) {
                        best = Some((score, phrase.as_str(), size));
                    }
                }
            }

            match best {
                Some((score, phrase, size)) if score >= self.threshold => {
                    let window = tokens[i..i + size].join(" ");
                    if window != phrase {
                        tracing::info!(
                            from = %window,
                            to = %phrase,
                            score,
                            "transcript correction"
                        );
                    }
                    output.push(phrase);
                    i += size;
                }
                _ => {
                    output.push(tokens[i]);
                    i += 1;
                }
            }
        }

        output.join(" ")
    }
}

/// Character trigrams of the lower-cased string with spaces removed
fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let chars: Vec<char> = text
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ')
        .collect();

    chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

/// Sørensen–Dice coefficient over character trigrams
///
/// Strings shorter than three characters have no trigrams and score 0.0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count();
    (2.0 * shared as f64) / (left.len() + right.len()) as f64
}
