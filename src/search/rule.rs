//! Fragment scoring: terminals, sub-fragment merges, and rule bodies.
//!
//! A fragment scored in isolation cannot know its final left context, so
//! its leading words (up to `order - 1` of them) carry provisional
//! probabilities computed against the fragment-internal context only.
//! Those words live in the fragment's [`LeftContext`]; when the fragment
//! is later concatenated to the right of known material, each left word is
//! rescored against the now-known context and the provisional estimate is
//! replaced. The provisional estimate is recomputable (it is exactly the
//! `full_score` chain over the fragment's own prefix), so nothing but the
//! boundary words needs to be stored.
//!
//! A left boundary is `full` once it holds `order - 1` words or the
//! fragment is anchored at `<s>`; words beyond it have their whole
//! scoring-relevant context inside the fragment and are final.

use crate::lm::{ChartState, NGramState, NgramLookup};
use crate::vocab::{WordId, UNK};

use super::Score;

/// Marker for a non-terminal gap inside a rule body.
pub const NONTERMINAL: WordId = WordId::MAX;

pub struct RuleScorer<'m, M: NgramLookup> {
    model: &'m M,
    state: ChartState,
    prob: Score,
    oov: usize,
}

impl<'m, M: NgramLookup> RuleScorer<'m, M> {
    /// Open fragment with no known context.
    pub fn new(model: &'m M) -> Self {
        RuleScorer {
            model,
            state: ChartState::empty(),
            prob: 0.0,
            oov: 0,
        }
    }

    /// Fragment anchored at the sentence start: the left boundary is
    /// resolved and the right context is `[<s>]`.
    pub fn begin_sentence(model: &'m M) -> Self {
        let mut state = ChartState::empty();
        state.left.full = true;
        state.right = model.begin_sentence_state();
        RuleScorer {
            model,
            state,
            prob: 0.0,
            oov: 0,
        }
    }

    /// Resume from an existing fragment boundary with a zeroed score
    /// accumulator; used to compute merge adjustments incrementally.
    pub fn from_state(model: &'m M, state: &ChartState) -> Self {
        RuleScorer {
            model,
            state: *state,
            prob: 0.0,
            oov: 0,
        }
    }

    /// Append one terminal word.
    pub fn terminal(&mut self, word: WordId) {
        if word == UNK {
            self.oov += 1;
        }
        let (ret, out) = self.model.full_score(&self.state.right, word);
        self.prob += ret.prob;
        self.state.right = out;
        self.push_left(word);
    }

    /// Merge a completed sub-fragment onto the right end of this one.
    ///
    /// The sub-fragment's own probability is not added here (the caller
    /// accounts for it via the sub-derivation's score); only the
    /// adjustment replacing its provisional left-word estimates is.
    pub fn non_terminal(&mut self, sub: &ChartState) {
        let mut ctx = self.state.right;
        let mut provisional = NGramState::empty();
        for i in 0..sub.left.len() {
            let w = sub.left.words[i];
            let (r_new, ctx_next) = self.model.full_score(&ctx, w);
            let (r_old, prov_next) = self.model.full_score(&provisional, w);
            self.prob += r_new.prob - r_old.prob;
            ctx = ctx_next;
            provisional = prov_next;
            self.push_left(w);
        }
        if sub.left.full {
            self.state.left.full = true;
            self.state.right = sub.right;
        } else {
            // Everything in the sub-fragment was rescored above; the chain
            // state is the true suffix of the concatenation.
            self.state.right = ctx;
        }
    }

    /// Close the fragment: accumulated log10 probability, boundary state,
    /// and OOV count.
    pub fn finish(self) -> (Score, ChartState, usize) {
        (self.prob, self.state, self.oov)
    }

    fn push_left(&mut self, word: WordId) {
        if self.state.left.full {
            return;
        }
        let len = self.state.left.length as usize;
        self.state.left.words[len] = word;
        self.state.left.length += 1;
        if self.state.left.length as usize == self.model.order() as usize - 1 {
            self.state.left.full = true;
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreRuleRet {
    /// Raw (unweighted) log10 probability of the rule's terminal runs.
    pub prob: Score,
    /// Number of `<unk>` terminals encountered.
    pub oov: usize,
}

/// Score a rule body containing [`NONTERMINAL`] gap markers.
///
/// Fills `between` with one boundary state per maximal terminal run
/// (`arity + 1` states). With `prepend_bos`, the first run is anchored at
/// the sentence start.
pub fn score_rule<M: NgramLookup>(
    model: &M,
    words: &[WordId],
    prepend_bos: bool,
    between: &mut Vec<ChartState>,
) -> ScoreRuleRet {
    between.clear();
    let mut scorer = if prepend_bos {
        RuleScorer::begin_sentence(model)
    } else {
        RuleScorer::new(model)
    };
    let mut ret = ScoreRuleRet::default();
    for &w in words {
        if w == NONTERMINAL {
            let (p, state, o) = scorer.finish();
            ret.prob += p;
            ret.oov += o;
            between.push(state);
            scorer = RuleScorer::new(model);
        } else {
            scorer.terminal(w);
        }
    }
    let (p, state, o) = scorer.finish();
    ret.prob += p;
    ret.oov += o;
    between.push(state);
    ret
}
