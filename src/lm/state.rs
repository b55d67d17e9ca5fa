//! Boundary context states for n-gram scoring.
//!
//! [`NGramState`] is the suffix context carried left-to-right: the most
//! recent words (newest first) with the backoff weights of each context
//! suffix. [`ChartState`] adds the left boundary of a partial fragment
//! whose outside context is not yet known, so that fragments can be scored
//! provisionally and adjusted when concatenated.

use std::hash::{Hash, Hasher};

use crate::vocab::WordId;

/// Highest model order the fixed-size states can hold.
pub const MAX_ORDER: usize = 6;
/// Context window size: `MAX_ORDER - 1` words on each boundary.
pub const MAX_CONTEXT: usize = MAX_ORDER - 1;

/// Suffix context: up to `MAX_CONTEXT` most-recent words, newest first.
///
/// `backoff[i]` is the backoff weight of the context suffix of length
/// `i + 1`. Backoffs are derived from the words, so equality and hashing
/// consider words and length only.
#[derive(Clone, Copy, Debug)]
pub struct NGramState {
    pub words: [WordId; MAX_CONTEXT],
    pub backoff: [f32; MAX_CONTEXT],
    pub length: u8,
}

impl NGramState {
    pub fn empty() -> Self {
        NGramState {
            words: [0; MAX_CONTEXT],
            backoff: [0.0; MAX_CONTEXT],
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn active_words(&self) -> &[WordId] {
        &self.words[..self.length as usize]
    }
}

impl Default for NGramState {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for NGramState {
    fn eq(&self, other: &Self) -> bool {
        self.active_words() == other.active_words()
    }
}

impl Eq for NGramState {}

impl Hash for NGramState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.active_words().hash(state);
    }
}

/// Left boundary of a fragment: the leading words whose probabilities are
/// still provisional, oldest first.
///
/// `full` means the left context is resolved: either the fragment already
/// holds `order - 1` leading words, a word's match could not be extended by
/// more left context, or the fragment is anchored at `<s>`. A full left
/// boundary never grows and its words are never re-scored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeftContext {
    pub words: [WordId; MAX_CONTEXT],
    pub length: u8,
    pub full: bool,
}

impl LeftContext {
    pub fn empty() -> Self {
        LeftContext {
            words: [0; MAX_CONTEXT],
            length: 0,
            full: false,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn active_words(&self) -> &[WordId] {
        &self.words[..self.length as usize]
    }
}

impl Hash for LeftContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.active_words().hash(state);
        self.full.hash(state);
    }
}

/// Combined boundary context of a partial fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChartState {
    pub left: LeftContext,
    pub right: NGramState,
}

impl ChartState {
    pub fn empty() -> Self {
        ChartState {
            left: LeftContext::empty(),
            right: NGramState::empty(),
        }
    }

    /// Stable 64-bit identity used for hypothesis recombination.
    pub fn recombination_hash(&self) -> u64 {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    /// True when two fragments carry identical scoring-relevant boundaries.
    pub fn recombinable_with(&self, other: &ChartState) -> bool {
        self == other
    }
}

impl Hash for ChartState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.left.hash(state);
        self.right.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(words: &[WordId], backoff: &[f32]) -> NGramState {
        let mut s = NGramState::empty();
        for (i, &w) in words.iter().enumerate() {
            s.words[i] = w;
            s.backoff[i] = backoff[i];
        }
        s.length = words.len() as u8;
        s
    }

    #[test]
    fn equality_ignores_backoff() {
        let a = state_with(&[3, 7], &[-0.5, -0.25]);
        let b = state_with(&[3, 7], &[0.0, 0.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_respects_length() {
        let a = state_with(&[3, 7], &[0.0, 0.0]);
        let b = state_with(&[3], &[0.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn trailing_words_do_not_leak_into_identity() {
        let mut a = state_with(&[3], &[0.0]);
        a.words[3] = 99; // beyond length; must not matter
        let b = state_with(&[3], &[0.0]);
        assert_eq!(a, b);
        assert_eq!(
            ChartState {
                left: LeftContext::empty(),
                right: a
            }
            .recombination_hash(),
            ChartState {
                left: LeftContext::empty(),
                right: b
            }
            .recombination_hash()
        );
    }

    #[test]
    fn chart_state_hash_distinguishes_left_full() {
        let mut open = ChartState::empty();
        open.left.words[0] = 5;
        open.left.length = 1;
        let mut full = open;
        full.left.full = true;
        assert_ne!(
            open.recombination_hash(),
            full.recombination_hash(),
            "resolved and unresolved left boundaries must not recombine"
        );
    }
}
