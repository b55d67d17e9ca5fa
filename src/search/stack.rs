//! Per-coverage-count hypothesis stacks.
//!
//! A stack accepts scored hypotheses while Open (or Scoring, while a batch
//! of language model pipeline work is outstanding), recombines on
//! (coverage, end position, LM suffix state), and on pruning evicts the
//! tail beyond the beam with a partial selection rather than a full sort.
//! A Finalized stack is immutable input for the next expansion round.

use std::collections::HashMap;

use tracing::debug;

use crate::lm::NGramState;

use super::applied::AppliedId;
use super::coverage::Coverage;
use super::Score;

#[derive(Clone, Debug)]
pub struct StackHypothesis {
    pub coverage: Coverage,
    /// Position after the last covered phrase; distortion is measured
    /// from here.
    pub end: usize,
    pub state: NGramState,
    pub score: Score,
    /// Admissible estimate for the uncovered remainder.
    pub future: Score,
    pub history: AppliedId,
}

impl StackHypothesis {
    pub fn total(&self) -> Score {
        self.score + self.future
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    /// Accepting new hypotheses.
    Open,
    /// A batch of asynchronous LM scoring for candidate extensions is in
    /// flight; candidates are admitted only once fully scored.
    Scoring,
    /// Beam applied; no further admissions.
    Pruned,
    /// Immutable input to the next round.
    Finalized,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct RecombKey {
    coverage: Coverage,
    end: usize,
    state: NGramState,
}

pub struct HypothesisStack {
    state: StackState,
    beam: usize,
    hyps: Vec<StackHypothesis>,
    by_key: HashMap<RecombKey, usize>,
}

impl HypothesisStack {
    pub fn new(beam: usize) -> Self {
        HypothesisStack {
            state: StackState::Open,
            beam,
            hyps: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.hyps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hyps.is_empty()
    }

    pub fn get(&self, i: usize) -> &StackHypothesis {
        &self.hyps[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackHypothesis> {
        self.hyps.iter()
    }

    /// Mark the stack as having pipeline work outstanding for a batch of
    /// candidate extensions.
    pub fn begin_scoring(&mut self) {
        debug_assert_eq!(self.state, StackState::Open);
        self.state = StackState::Scoring;
    }

    /// The batch has fully resolved and its candidates were admitted.
    pub fn end_scoring(&mut self) {
        debug_assert_eq!(self.state, StackState::Scoring);
        self.state = StackState::Open;
    }

    /// Admit a fully scored hypothesis. A hypothesis with pending LM work
    /// must never reach this point; partially scored candidates are not
    /// comparable with fully scored ones.
    pub fn add_scored(&mut self, hyp: StackHypothesis) {
        debug_assert!(
            matches!(self.state, StackState::Open | StackState::Scoring),
            "add_scored on a closed stack"
        );
        let key = RecombKey {
            coverage: hyp.coverage.clone(),
            end: hyp.end,
            state: hyp.state,
        };
        match self.by_key.get(&key) {
            Some(&i) => {
                if hyp.score > self.hyps[i].score {
                    self.hyps[i] = hyp;
                }
            }
            None => {
                self.by_key.insert(key, self.hyps.len());
                self.hyps.push(hyp);
            }
        }
    }

    /// Apply the beam: keep the best `beam` hypotheses by total score.
    /// Partial selection, not a full sort.
    pub fn prune(&mut self) {
        debug_assert!(matches!(
            self.state,
            StackState::Open | StackState::Scoring
        ));
        if self.beam > 0 && self.hyps.len() > self.beam {
            let evicted = self.hyps.len() - self.beam;
            self.hyps
                .select_nth_unstable_by(self.beam - 1, |a, b| b.total().total_cmp(&a.total()));
            self.hyps.truncate(self.beam);
            debug!(evicted, "beam applied");
        }
        // Recombination indices are stale after the shuffle; the stack no
        // longer accepts admissions anyway.
        self.by_key.clear();
        self.state = StackState::Pruned;
    }

    /// Close the stack for use as next-round input.
    pub fn finalize(&mut self) -> &[StackHypothesis] {
        if matches!(self.state, StackState::Open | StackState::Scoring) {
            self.prune();
        }
        self.state = StackState::Finalized;
        &self.hyps
    }

    pub fn best(&self) -> Option<&StackHypothesis> {
        self.hyps
            .iter()
            .max_by(|a, b| a.total().total_cmp(&b.total()))
    }
}
