//! Hyperedges: rule applications with partially specified sub-derivations.
//!
//! An edge's score is the sum of its rule features, the language model
//! score of its terminal runs, and the bound of each non-terminal slot's
//! cursor. The `between` array holds one boundary state per maximal
//! terminal run (`arity + 1` of them); as slots complete, their states are
//! merged into their neighbors, so a complete edge's final state lives in
//! `between[0]`.

use std::cmp::Ordering;

use crate::lm::{ChartState, NgramLookup};

use super::applied::AppliedId;
use super::rule::RuleScorer;
use super::vertex::PartialVertex;
use super::{Label, Note, Score, Span};

#[derive(Clone)]
pub struct PartialEdge<'a> {
    pub(crate) score: Score,
    pub(crate) arity: u8,
    pub(crate) note: Note,
    pub(crate) label: Label,
    pub(crate) span: Span,
    pub(crate) nt: [Option<PartialVertex<'a>>; 2],
    pub(crate) between: [ChartState; 3],
    /// Slots whose completed state has been merged into `between`.
    merged: [bool; 2],
}

impl<'a> PartialEdge<'a> {
    pub fn new(note: Note, label: Label, span: Span) -> Self {
        PartialEdge {
            score: 0.0,
            arity: 0,
            note,
            label,
            span,
            nt: [None, None],
            between: [ChartState::empty(); 3],
            merged: [false, false],
        }
    }

    /// Bind the next non-terminal slot. Arity above two is rejected by the
    /// manager before edges are built.
    pub fn push_nt(&mut self, vertex: PartialVertex<'a>) {
        debug_assert!(self.arity < 2, "edge arity exceeds 2");
        self.nt[self.arity as usize] = Some(vertex);
        self.arity += 1;
    }

    pub fn set_score(&mut self, score: Score) {
        self.score = score;
    }

    pub fn set_between(&mut self, states: &[ChartState]) {
        debug_assert_eq!(states.len(), self.arity as usize + 1);
        self.between[..states.len()].copy_from_slice(states);
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn note(&self) -> Note {
        self.note
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    pub fn complete(&self) -> bool {
        self.nt[..self.arity as usize]
            .iter()
            .all(|v| v.as_ref().is_some_and(|v| v.complete()))
    }

    /// Final merged boundary state; only meaningful once complete.
    pub fn state(&self) -> &ChartState {
        debug_assert!(self.complete());
        &self.between[0]
    }

    /// Derivation handle chosen for slot `i`; only meaningful once that
    /// slot is complete.
    pub fn nt_history(&self, i: usize) -> AppliedId {
        self.nt[i].as_ref().expect("slot within arity").history()
    }

    /// Fold in any slot that is already complete when the edge is seeded
    /// (a one-hypothesis vertex never splits, so nothing else would merge
    /// its state).
    pub(crate) fn merge_seeded_slots<M: NgramLookup>(&mut self, model: &M, lm_weight: Score) {
        for i in 0..self.arity as usize {
            if self.nt[i].as_ref().expect("slot within arity").complete() {
                let adjust = self.merge_completed_slot(model, i);
                self.score += adjust * lm_weight;
            }
        }
    }

    /// Merge a just-completed slot's state with its adjacent terminal-run
    /// states, returning the raw (unweighted) log10 adjustment for the
    /// boundary n-grams that changed.
    pub(crate) fn merge_completed_slot<M: NgramLookup>(&mut self, model: &M, victim: usize) -> Score {
        debug_assert!(!self.merged[victim]);
        // After slot 0 merges, between[0] holds everything left of slot 1.
        let left_idx = if victim == 1 && self.merged[0] { 0 } else { victim };
        let right_idx = victim + 1;

        let sub = *self.nt[victim].as_ref().expect("slot within arity").state();
        let right = self.between[right_idx];
        let mut scorer = RuleScorer::from_state(model, &self.between[left_idx]);
        scorer.non_terminal(&sub);
        scorer.non_terminal(&right);
        let (adjust, merged_state, _) = scorer.finish();

        self.between[left_idx] = merged_state;
        self.merged[victim] = true;
        adjust
    }
}

impl PartialEq for PartialEdge<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.score.total_cmp(&other.score) == Ordering::Equal
    }
}

impl Eq for PartialEdge<'_> {}

impl PartialOrd for PartialEdge<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartialEdge<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}
