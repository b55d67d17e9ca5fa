//! Cube pruning over a cell's hyperedges.
//!
//! Edges sit in a max-heap ordered by score. Popping the top either yields
//! a finished hypothesis (all slots complete) or splits the least-revealed
//! incomplete slot into its best child (continuation) and next-best
//! sibling (alternative), rescoring only the boundary n-grams the split
//! changed before both re-enter the heap. Emission stops at the pop limit
//! or when the heap runs dry.
//!
//! Emission order is non-increasing in score provided every slot's
//! `bound()` is admissible; an overstated true score hiding behind a low
//! bound would let a later pop beat an earlier one. That precondition is
//! on the bound provider and is deliberately not checked at runtime.

use std::collections::BinaryHeap;

use tracing::{debug, debug_span};

use crate::lm::NgramLookup;

use super::context::DecodingContext;
use super::edge::PartialEdge;

/// Consumer of finished hypotheses.
pub trait EdgeOutput {
    fn new_hypothesis(&mut self, edge: &PartialEdge<'_>);
}

#[derive(Default)]
pub struct EdgeGenerator<'a> {
    queue: BinaryHeap<PartialEdge<'a>>,
}

impl<'a> EdgeGenerator<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an edge. Slots already complete (one-hypothesis vertices) are
    /// merged here since they will never split.
    pub fn add_edge<M: NgramLookup>(
        &mut self,
        ctx: &DecodingContext<'_, M>,
        mut edge: PartialEdge<'a>,
    ) {
        edge.merge_seeded_slots(ctx.model, ctx.lm_weight());
        self.queue.push(edge);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Emit up to `pop_limit` finished hypotheses, best-first.
    pub fn search<M, O>(&mut self, ctx: &DecodingContext<'_, M>, output: &mut O)
    where
        M: NgramLookup,
        O: EdgeOutput,
    {
        let mut to_pop = ctx.pop_limit();
        let _span = debug_span!("cube_search", pop_limit = to_pop, edges = self.queue.len()).entered();
        let mut emitted = 0usize;
        while to_pop > 0 {
            match self.pop(ctx) {
                Some(edge) => {
                    output.new_hypothesis(&edge);
                    emitted += 1;
                    to_pop -= 1;
                }
                None => break,
            }
        }
        debug!(emitted);
    }

    /// Pop the next finished hypothesis, splitting incomplete edges along
    /// the way. `None` means the queue is exhausted.
    pub fn pop<M: NgramLookup>(&mut self, ctx: &DecodingContext<'_, M>) -> Option<PartialEdge<'a>> {
        loop {
            let top = self.queue.pop()?;
            if top.complete() {
                return Some(top);
            }

            // Victim: the incomplete slot with the least revealed context,
            // smallest index on ties; splitting it first limits wasted
            // boundary rescoring.
            let mut victim = usize::MAX;
            let mut least = usize::MAX;
            for i in 0..top.arity() {
                let v = top.nt[i].as_ref().expect("slot within arity");
                if !v.complete() && v.length() < least {
                    least = v.length();
                    victim = i;
                }
            }
            debug_assert!(victim != usize::MAX);

            let old_bound = top.nt[victim].as_ref().unwrap().bound();

            let mut continuation = top.clone();
            let alternative = continuation.nt[victim].as_mut().unwrap().split();

            // Alternative: same edge, victim advanced to its next-best
            // sibling.
            if let Some(alt) = alternative {
                let mut alt_edge = top.clone();
                alt_edge.score += alt.bound() - old_bound;
                alt_edge.nt[victim] = Some(alt);
                self.queue.push(alt_edge);
            }

            // Continuation: victim descended into its best child.
            let new_bound = continuation.nt[victim].as_ref().unwrap().bound();
            continuation.score += new_bound - old_bound;
            if continuation.nt[victim].as_ref().unwrap().complete() {
                let adjust = continuation.merge_completed_slot(ctx.model, victim);
                continuation.score += adjust * ctx.lm_weight();
            }
            self.queue.push(continuation);
        }
    }
}
