//! Round-robin scheduling of automaton slots.
//!
//! `Queue::add` drains the current slot's leftover work, assigns the new
//! task there, issues its first step, and advances, so while one request
//! is being drained, the other `size - 1` slots' lookups are already in
//! flight. `drain` steps slots strictly round-robin (a1, a2, …, aN,
//! a1, …) rather than running one slot to completion at a time: the
//! neighbor-notification protocol assumes slot progress never diverges by
//! more than a step.

use tracing::debug;

use super::automaton::{Automata, SlotHandle, Status, Task, TaskContext, Token};
use super::model::{FullScoreReturn, NgramLookup};
use super::state::NGramState;
use crate::vocab::WordId;

pub struct Queue<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    automata: Automata<'m, M, S>,
    curr: usize,
}

impl<'m, M, S> Queue<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    pub fn new(model: &'m M, size: usize, sink: S) -> Self {
        Queue {
            automata: Automata::new(model, size, sink),
            curr: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.automata.len()
    }

    /// Assign a task to the current slot, draining its previous work first.
    pub fn add(&mut self, task: Task) -> SlotHandle {
        while self.automata.step(self.curr) == Status::Working {}
        let handle = self.automata.set_task(self.curr, task);
        self.automata.step(self.curr);
        self.curr = (self.curr + 1) % self.automata.len();
        handle
    }

    /// Run every slot to completion, interleaving steps across slots.
    pub fn drain(&mut self) {
        loop {
            let mut all_done = true;
            for off in 0..self.automata.len() {
                let i = (self.curr + off) % self.automata.len();
                if self.automata.step(i) == Status::Working {
                    all_done = false;
                }
            }
            if all_done {
                break;
            }
        }
    }
}

/// Scores word sequences incrementally, chaining each word onto the
/// previous word's automaton.
///
/// Completions arrive through the sink, tagged with the token supplied per
/// word; they may arrive in any order relative to submission, but each
/// fires only after its own lookups and its predecessor's backoff handoff
/// are done.
pub struct Pipeline<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    queue: Queue<'m, M, S>,
    pred: Option<SlotHandle>,
}

impl<'m, M, S> Pipeline<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    pub fn new(model: &'m M, slots: usize, sink: S) -> Self {
        Pipeline {
            queue: Queue::new(model, slots, sink),
            pred: None,
        }
    }

    /// Start a fresh chain: score `word` against an explicit context state.
    pub fn begin_score(&mut self, context: &NGramState, word: WordId, token: Token) {
        self.pred = Some(self.queue.add(Task {
            context: TaskContext::State(*context),
            word,
            token,
        }));
    }

    /// Chain one more word onto the current sequence.
    pub fn append_word(&mut self, word: WordId, token: Token) {
        let pred = self
            .pred
            .expect("append_word requires a preceding begin_score");
        self.pred = Some(self.queue.add(Task {
            context: TaskContext::Chain(pred),
            word,
            token,
        }));
    }

    /// Flush all in-flight work; every pending completion fires before this
    /// returns.
    pub fn drain(&mut self) {
        self.queue.drain();
        self.pred = None;
        debug!("pipeline drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::model::tests::tiny_model;
    use crate::lm::model::HashedModel;

    fn ids(model: &HashedModel, words: &[&str]) -> Vec<WordId> {
        words.iter().map(|w| model.vocab().get(w)).collect()
    }

    struct Got {
        prob: f32,
        state: NGramState,
        fired: bool,
    }

    /// Pipelined scoring must agree with the one-shot scorer for every
    /// prefix, for any slot count: pipelining is a latency optimization
    /// with zero semantic effect.
    #[test]
    fn pipeline_matches_full_score() {
        let model = tiny_model();
        let words = ids(&model, &["the", "cat", "sat", "down"]);

        // Reference: naive full_score chain from <s>.
        let mut expected = Vec::new();
        let mut state = model.begin_sentence_state();
        for &w in &words {
            let (ret, next) = model.full_score(&state, w);
            expected.push((ret.prob, next));
            state = next;
        }

        for slots in [1, 2, 3, 8] {
            let mut got: Vec<Got> = words
                .iter()
                .map(|_| Got {
                    prob: 0.0,
                    state: NGramState::empty(),
                    fired: false,
                })
                .collect();
            {
                let mut pipe = Pipeline::new(&model, slots, |token, ret, state| {
                    let g = &mut got[token as usize];
                    assert!(!g.fired, "duplicate completion for token {token}");
                    g.prob = ret.prob;
                    g.state = state;
                    g.fired = true;
                });
                pipe.begin_score(&model.begin_sentence_state(), words[0], 0);
                for (i, &w) in words.iter().enumerate().skip(1) {
                    pipe.append_word(w, i as Token);
                }
                pipe.drain();
            }

            for (i, g) in got.iter().enumerate() {
                assert!(g.fired, "token {i} never completed (slots={slots})");
                assert!(
                    (g.prob - expected[i].0).abs() < 1e-5,
                    "prob mismatch at word {i} (slots={slots}): {} vs {}",
                    g.prob,
                    expected[i].0
                );
                assert_eq!(
                    g.state, expected[i].1,
                    "state mismatch at word {i} (slots={slots})"
                );
            }
        }
    }

    /// Two independent chains interleaved through one queue must not
    /// interfere with each other.
    #[test]
    fn interleaved_chains_are_independent() {
        let model = tiny_model();
        let a = ids(&model, &["the", "cat", "sat"]);
        let b = ids(&model, &["the", "sat", "down"]);

        let (exp_a, _) = model.score_sequence(&model.begin_sentence_state(), &a);
        let (exp_b, _) = model.score_sequence(&NGramState::empty(), &b);

        let mut totals = [0.0f32; 2];
        {
            let mut queue = Queue::new(&model, 4, |token, ret, _state| {
                totals[token as usize] += ret.prob;
            });
            let bos = model.begin_sentence_state();
            let empty = NGramState::empty();
            let mut ha = queue.add(Task {
                context: TaskContext::State(bos),
                word: a[0],
                token: 0,
            });
            let mut hb = queue.add(Task {
                context: TaskContext::State(empty),
                word: b[0],
                token: 1,
            });
            for i in 1..3 {
                ha = queue.add(Task {
                    context: TaskContext::Chain(ha),
                    word: a[i],
                    token: 0,
                });
                hb = queue.add(Task {
                    context: TaskContext::Chain(hb),
                    word: b[i],
                    token: 1,
                });
            }
            queue.drain();
        }

        assert!((totals[0] - exp_a).abs() < 1e-5);
        assert!((totals[1] - exp_b).abs() < 1e-5);
    }

    /// A single-slot queue degenerates to synchronous scoring: the slot is
    /// its own predecessor and must be read out before reuse.
    #[test]
    fn single_slot_queue_chains_through_itself() {
        let model = tiny_model();
        let words = ids(&model, &["the", "cat", "sat", "down"]);
        let (expected, _) = model.score_sequence(&model.begin_sentence_state(), &words);

        let mut total = 0.0f32;
        {
            let mut pipe = Pipeline::new(&model, 1, |_tok, ret, _state| total += ret.prob);
            pipe.begin_score(&model.begin_sentence_state(), words[0], 0);
            for (i, &w) in words.iter().enumerate().skip(1) {
                pipe.append_word(w, i as Token);
            }
            pipe.drain();
        }
        assert!((total - expected).abs() < 1e-5);
    }

    #[test]
    fn drain_on_idle_queue_is_a_noop() {
        let model = tiny_model();
        let mut fired = 0u32;
        let mut pipe = Pipeline::new(&model, 4, |_t, _r, _s| fired += 1);
        pipe.drain();
        pipe.drain();
        drop(pipe);
        assert_eq!(fired, 0);
    }

    /// Fresh chains may be started after a drain; slot reuse must not leak
    /// the previous chain's state.
    #[test]
    fn queue_reuse_across_chains() {
        let model = tiny_model();
        let words = ids(&model, &["the", "cat"]);
        let (expected, _) = model.score_sequence(&model.begin_sentence_state(), &words);

        let mut totals = vec![0.0f32; 2];
        {
            let mut pipe = Pipeline::new(&model, 2, |token, ret, _s| {
                totals[token as usize] += ret.prob;
            });
            for round in 0..2u64 {
                pipe.begin_score(&model.begin_sentence_state(), words[0], round);
                pipe.append_word(words[1], round);
                pipe.drain();
            }
        }
        assert!((totals[0] - expected).abs() < 1e-5);
        assert!((totals[1] - expected).abs() < 1e-5);
    }
}
