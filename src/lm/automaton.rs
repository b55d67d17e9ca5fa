//! Incremental per-word scoring automata.
//!
//! Each in-flight scoring request occupies one slot and advances one
//! n-gram order per `step()`: prefetch the unigram, retrieve it, then walk
//! middle orders up to the longest table, stopping early on a miss or when
//! the match is independent of further left context. Requests chain:
//! a word's context state is its predecessor's output state, which may not
//! be final yet when the successor starts. The finish protocol forwards
//! backoff weights and parked results across the chain so completions may
//! happen in either order.
//!
//! Slots reference each other by index plus a generation counter rather
//! than by pointer; a stale handle trips a debug assertion instead of
//! aliasing reused state.

use super::model::{FullScoreReturn, NgramLookup, Node};
use super::state::{NGramState, MAX_CONTEXT};
use crate::vocab::WordId;

/// Caller tag passed back through the sink with each completion.
pub type Token = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Working,
    Done,
}

/// Handle to an automaton slot. The generation detects handles that have
/// outlived the task they were issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// Context source for a task: chained onto an earlier request, or an
/// explicit boundary state. The enum makes the "both or neither supplied"
/// contract violation of the pointer-based original unrepresentable.
#[derive(Clone, Copy, Debug)]
pub enum TaskContext {
    Chain(SlotHandle),
    State(NGramState),
}

#[derive(Clone, Copy, Debug)]
pub struct Task {
    pub context: TaskContext,
    pub word: WordId,
    pub token: Token,
}

struct Slot {
    status: Status,
    /// Next lookup order to issue; 0 is the unigram prefetch step.
    step_order: u8,
    node: Node,
    word: WordId,
    token: Token,
    in_words: [WordId; MAX_CONTEXT],
    in_backoff: [f32; MAX_CONTEXT],
    in_length: u8,
    out: NGramState,
    ret: FullScoreReturn,
    pred: Option<SlotHandle>,
    pred_finished: bool,
    succ: Option<SlotHandle>,
    succ_finished: bool,
    succ_ret: FullScoreReturn,
    succ_token: Token,
    generation: u64,
}

impl Slot {
    fn idle() -> Self {
        Slot {
            status: Status::Done,
            step_order: 0,
            node: 0,
            word: 0,
            token: 0,
            in_words: [0; MAX_CONTEXT],
            in_backoff: [0.0; MAX_CONTEXT],
            in_length: 0,
            out: NGramState::empty(),
            ret: FullScoreReturn::default(),
            pred: None,
            pred_finished: true,
            succ: None,
            succ_finished: false,
            succ_ret: FullScoreReturn::default(),
            succ_token: 0,
            generation: 0,
        }
    }
}

/// Fixed bank of automaton slots sharing one model and one completion sink.
pub struct Automata<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    model: &'m M,
    sink: S,
    slots: Vec<Slot>,
    order: u8,
}

impl<'m, M, S> Automata<'m, M, S>
where
    M: NgramLookup,
    S: FnMut(Token, FullScoreReturn, NGramState),
{
    pub fn new(model: &'m M, size: usize, sink: S) -> Self {
        assert!(size > 0, "automaton bank needs at least one slot");
        let order = model.order();
        Automata {
            model,
            sink,
            slots: (0..size).map(|_| Slot::idle()).collect(),
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn status(&self, index: usize) -> Status {
        self.slots[index].status
    }

    /// Assign a task to a finished slot. The slot's previous work must have
    /// completed (the queue drains before reassigning).
    pub fn set_task(&mut self, index: usize, task: Task) -> SlotHandle {
        debug_assert_eq!(
            self.slots[index].status,
            Status::Done,
            "set_task on a working slot"
        );

        // Read the predecessor before touching the target slot: with a
        // single-slot bank the predecessor IS the target slot.
        let (in_words, in_backoff, in_length, pred, pred_finished) = match task.context {
            TaskContext::State(s) => (s.words, s.backoff, s.length, None, true),
            TaskContext::Chain(h) => {
                let p = &self.slots[h.index];
                debug_assert_eq!(p.generation, h.generation, "stale predecessor handle");
                if p.status == Status::Done {
                    (p.out.words, p.out.backoff, p.out.length, None, true)
                } else {
                    // Words and a provisional length are available now;
                    // backoffs and the final length arrive when the
                    // predecessor finishes.
                    (p.out.words, [0.0; MAX_CONTEXT], p.out.length, Some(h), false)
                }
            }
        };

        let order = self.order as usize;
        let slot = &mut self.slots[index];
        slot.generation += 1;
        slot.status = Status::Working;
        slot.step_order = 0;
        slot.node = 0;
        slot.word = task.word;
        slot.token = task.token;
        slot.in_words = in_words;
        slot.in_backoff = in_backoff;
        slot.in_length = in_length;
        slot.ret = FullScoreReturn::default();
        slot.pred = pred;
        slot.pred_finished = pred_finished;
        slot.succ = None;
        slot.succ_finished = false;

        slot.out = NGramState::empty();
        slot.out.words[0] = task.word;
        let keep = (in_length as usize).min(order - 2);
        slot.out.words[1..=keep].copy_from_slice(&in_words[..keep]);
        slot.out.length = ((in_length as usize + 1).min(order - 1)) as u8;

        let handle = SlotHandle {
            index,
            generation: slot.generation,
        };
        if let Some(h) = pred {
            self.slots[h.index].succ = Some(handle);
        }
        handle
    }

    /// Advance a slot by one lookup order. Returns the slot's status after
    /// the step.
    pub fn step(&mut self, index: usize) -> Status {
        if self.slots[index].status == Status::Done {
            return Status::Done;
        }
        match self.slots[index].step_order {
            0 => {
                let slot = &mut self.slots[index];
                slot.step_order = 1;
                self.model.prefetch_unigram(slot.word);
                Status::Working
            }
            1 => self.unigram_step(index),
            k if k == self.order => self.longest_step(index),
            _ => self.middle_step(index),
        }
    }

    fn unigram_step(&mut self, index: usize) -> Status {
        let model = self.model;
        let slot = &mut self.slots[index];
        slot.step_order = 2;
        let mut node = slot.node;
        let uni = model.lookup_unigram(slot.word, &mut node);
        slot.node = node;
        slot.out.backoff[0] = uni.backoff;
        slot.ret.prob = uni.prob;
        slot.ret.ngram_length = 1;
        slot.ret.independent_left = !uni.extends_left;

        let clip = !uni.extends_right;
        let stop = slot.in_length == 0 || slot.ret.independent_left;
        let next_word = slot.in_words[0];
        if clip {
            self.write_out_length(index, 0);
        }
        if stop {
            self.finish(index);
            return Status::Done;
        }
        // Order >= 3 guarantees there is a middle table to prefetch; this
        // is why construction rejects lower orders.
        model.prefetch_middle(0, next_word, self.slots[index].node);
        Status::Working
    }

    fn middle_step(&mut self, index: usize) -> Status {
        let model = self.model;
        let order = self.order as usize;
        let slot = &mut self.slots[index];
        let k = slot.step_order as usize;
        slot.step_order += 1;

        let mut node = slot.node;
        match model.lookup_middle((k - 2) as u8, slot.in_words[k - 2], &mut node) {
            None => {
                slot.ret.independent_left = true;
                self.finish(index);
                Status::Done
            }
            Some(m) => {
                slot.node = node;
                slot.out.backoff[k - 1] = m.backoff;
                slot.ret.prob = m.prob;
                slot.ret.ngram_length = k as u8;
                slot.ret.independent_left = !m.extends_left;

                let clip = !m.extends_right;
                let stop = (k - 1) == slot.in_length as usize || slot.ret.independent_left;
                let next_word = slot.in_words[k - 1];
                if clip {
                    self.write_out_length(index, k - 1);
                }
                if stop {
                    self.finish(index);
                    return Status::Done;
                }
                let node = self.slots[index].node;
                if k + 1 == order {
                    model.prefetch_longest(next_word, node);
                } else {
                    model.prefetch_middle((k - 1) as u8, next_word, node);
                }
                Status::Working
            }
        }
    }

    fn longest_step(&mut self, index: usize) -> Status {
        let model = self.model;
        let order = self.order as usize;
        let slot = &mut self.slots[index];
        slot.step_order += 1;
        slot.ret.independent_left = true;
        if let Some(p) = model.lookup_longest(slot.in_words[order - 2], slot.node) {
            slot.ret.prob = p;
            slot.ret.ngram_length = order as u8;
        }
        self.finish(index);
        Status::Done
    }

    /// Shrink a slot's output state, propagating the new length to a
    /// still-chained successor.
    fn write_out_length(&mut self, index: usize, len: usize) {
        let slot = &mut self.slots[index];
        if len < slot.out.length as usize {
            slot.out.length = len as u8;
            if let (Some(h), false) = (slot.succ, slot.succ_finished) {
                debug_assert_eq!(self.slots[h.index].generation, h.generation);
                self.slots[h.index].in_length = len as u8;
            }
        }
    }

    /// Completion protocol: apply chain-position backoffs, fire callbacks,
    /// and hand off to neighbors that finished in the other order.
    fn finish(&mut self, index: usize) {
        let final_len = (self.slots[index].ret.ngram_length as usize).min(self.order as usize - 1);
        self.write_out_length(index, final_len);

        let slot = &mut self.slots[index];
        let mut ret = slot.ret;
        let token = slot.token;
        let in_length = slot.in_length as usize;
        let in_backoff = slot.in_backoff;
        let out = slot.out;
        let pred = slot.pred;
        let pred_finished = slot.pred_finished;
        let succ = slot.succ;
        let succ_finished = slot.succ_finished;
        let succ_ret = slot.succ_ret;
        let succ_token = slot.succ_token;
        slot.status = Status::Done;

        if pred_finished {
            for j in (ret.ngram_length as usize - 1)..in_length {
                ret.prob += in_backoff[j];
            }
            (self.sink)(token, ret, out);
        } else {
            let h = pred.expect("unfinished predecessor must be linked");
            debug_assert_eq!(self.slots[h.index].generation, h.generation);
            let p = &mut self.slots[h.index];
            p.succ_finished = true;
            p.succ_ret = ret;
            p.succ_token = token;
        }

        if succ_finished {
            let h = succ.expect("a parked successor result implies a successor");
            debug_assert_eq!(self.slots[h.index].generation, h.generation);
            let mut sr = succ_ret;
            for j in (sr.ngram_length as usize - 1)..(out.length as usize) {
                sr.prob += out.backoff[j];
            }
            let succ_out = self.slots[h.index].out;
            (self.sink)(succ_token, sr, succ_out);
        } else if let Some(h) = succ {
            debug_assert_eq!(self.slots[h.index].generation, h.generation);
            let s = &mut self.slots[h.index];
            s.in_backoff = out.backoff;
            s.in_length = out.length;
            s.pred_finished = true;
        }
    }
}
