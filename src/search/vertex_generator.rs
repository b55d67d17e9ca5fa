//! Hypothesis aggregation for one (span, label) cell.
//!
//! Completed hypotheses stream in from cube pruning; hypotheses whose
//! boundary states are identical are recombined, keeping the higher score
//! and its derivation (the loser is dropped in place, never duplicated).
//! `finished_search` freezes the survivors into a queryable [`Vertex`].

use std::collections::HashMap;

use tracing::debug;

use crate::lm::ChartState;

use super::applied::AppliedId;
use super::vertex::{HypoState, Vertex};
use super::Score;

#[derive(Default)]
pub struct VertexGenerator {
    by_state: HashMap<u64, usize>,
    hypos: Vec<HypoState>,
}

impl VertexGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed hypothesis, recombining on boundary state.
    pub fn new_hypothesis(&mut self, state: ChartState, score: Score, history: AppliedId) {
        let key = state.recombination_hash();
        match self.by_state.get(&key) {
            Some(&i) => {
                let existing = &mut self.hypos[i];
                debug_assert!(existing.state.recombinable_with(&state));
                if score > existing.score {
                    *existing = HypoState {
                        state,
                        score,
                        history,
                    };
                }
            }
            None => {
                self.by_state.insert(key, self.hypos.len());
                self.hypos.push(HypoState {
                    state,
                    score,
                    history,
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hypos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypos.is_empty()
    }

    /// Freeze collected hypotheses into a vertex.
    pub fn finished_search(self) -> Vertex {
        debug!(hypo_count = self.hypos.len(), "cell frozen");
        Vertex::from_hypos(self.hypos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::{ChartState, LeftContext, NGramState};
    use crate::search::applied::AppliedId;

    fn state_with_right(words: &[u32]) -> ChartState {
        let mut right = NGramState::empty();
        for (i, &w) in words.iter().enumerate() {
            right.words[i] = w;
        }
        right.length = words.len() as u8;
        ChartState {
            left: LeftContext::empty(),
            right,
        }
    }

    /// Higher-scored duplicate wins regardless of insertion order; the
    /// later, worse duplicate never replaces a better survivor.
    #[test]
    fn dedup_keeps_higher_score() {
        let mut gen = VertexGenerator::new();
        let s = state_with_right(&[7, 3]);
        gen.new_hypothesis(s, -2.0, AppliedId::NONE);
        gen.new_hypothesis(s, -5.0, AppliedId::NONE);
        assert_eq!(gen.len(), 1);

        let vertex = gen.finished_search();
        let (score, _) = vertex.best_child().unwrap();
        assert!((score + 2.0).abs() < 1e-6);
    }

    #[test]
    fn dedup_upgrades_on_better_score() {
        let mut gen = VertexGenerator::new();
        let s = state_with_right(&[7, 3]);
        gen.new_hypothesis(s, -5.0, AppliedId::NONE);
        gen.new_hypothesis(s, -2.0, AppliedId::NONE);
        assert_eq!(gen.len(), 1);
        assert!((gen.finished_search().bound() + 2.0).abs() < 1e-6);
    }

    #[test]
    fn distinct_states_both_survive() {
        let mut gen = VertexGenerator::new();
        gen.new_hypothesis(state_with_right(&[7, 3]), -2.0, AppliedId::NONE);
        gen.new_hypothesis(state_with_right(&[7, 4]), -3.0, AppliedId::NONE);
        assert_eq!(gen.len(), 2);

        let vertex = gen.finished_search();
        let best = vertex.extract(10);
        assert_eq!(best.len(), 2);
        assert!(best[0].0 >= best[1].0);
    }

    #[test]
    fn empty_generator_freezes_to_empty_vertex() {
        let vertex = VertexGenerator::new().finished_search();
        assert!(vertex.empty());
        assert_eq!(vertex.bound(), f32::NEG_INFINITY);
        assert!(vertex.best_child().is_none());
    }

    /// Splitting a frozen vertex enumerates hypotheses best-first.
    #[test]
    fn split_enumerates_best_first() {
        let mut gen = VertexGenerator::new();
        gen.new_hypothesis(state_with_right(&[1]), -3.0, AppliedId::NONE);
        gen.new_hypothesis(state_with_right(&[2]), -1.0, AppliedId::NONE);
        gen.new_hypothesis(state_with_right(&[3]), -2.0, AppliedId::NONE);
        let vertex = gen.finished_search();

        let mut cursor = vertex.root_partial();
        let mut scores = Vec::new();
        let mut pending = Vec::new();
        loop {
            if cursor.complete() {
                scores.push(cursor.score());
                match pending.pop() {
                    Some(alt) => cursor = alt,
                    None => break,
                }
            } else if let Some(alt) = cursor.split() {
                pending.push(alt);
            }
        }
        scores.sort_by(|a: &f32, b: &f32| b.total_cmp(a));
        assert_eq!(scores.len(), 3);
        assert!((scores[0] + 1.0).abs() < 1e-6);
        assert!((scores[2] + 3.0).abs() < 1e-6);
    }
}
