//! Phrase-based stack decoding over a coverage bitmap.
//!
//! Stacks are indexed by the number of covered source words. Each round
//! takes the finalized stack for the current count, enumerates every
//! (hypothesis, free span, phrase option) extension within the distortion
//! limit, and scores all appended target words through the language model
//! pipeline in one batch, so the queue's slots overlap the lookups of
//! unrelated candidates. A candidate is admitted to its target stack only
//! once every one of its words has completed, so partially scored
//! hypotheses never compete with fully scored ones.

use tracing::{debug, debug_span};

use crate::lm::pipeline::Pipeline;
use crate::lm::{NGramState, NgramLookup};
use crate::vocab::{WordId, UNK};

use super::applied::{AppliedArena, AppliedId};
use super::context::DecodingContext;
use super::coverage::Coverage;
use super::stack::{HypothesisStack, StackHypothesis};
use super::{Note, Score, Span, MINIMUM_SCORE};

/// A candidate target phrase for one source span.
#[derive(Clone, Debug)]
pub struct PhraseOption {
    pub span: Span,
    pub words: Vec<WordId>,
    /// Pre-weighted feature score, excluding the language model.
    pub score: Score,
    pub note: Note,
}

/// External collaborator supplying phrase options per span. A span with
/// no options is simply never covered in one step; unknown-word handling
/// happens upstream.
pub trait PhraseSource {
    fn options(&self, span: Span) -> &[PhraseOption];
}

/// One decoded translation: covered phrases in target order.
#[derive(Clone, Debug)]
pub struct PhrasePath {
    pub score: Score,
    pub phrases: Vec<(Span, Note)>,
}

pub struct PhraseManager<'c, M: NgramLookup> {
    ctx: &'c DecodingContext<'c, M>,
    arena: AppliedArena,
}

struct Pending {
    hyp: usize,
    span: Span,
    opt: usize,
}

#[derive(Clone, Copy)]
struct ScoreCell {
    prob: f32,
    state: NGramState,
    remaining: u32,
}

impl<'c, M: NgramLookup> PhraseManager<'c, M> {
    pub fn new(ctx: &'c DecodingContext<'c, M>) -> Self {
        PhraseManager {
            ctx,
            arena: AppliedArena::new(),
        }
    }

    /// Decode a sentence of `len` source positions, returning up to
    /// `nbest` paths, best first. Pools are reset on entry.
    pub fn decode(&mut self, source: &dyn PhraseSource, len: usize) -> Vec<PhrasePath> {
        self.arena.reset();
        let _span = debug_span!("phrase_decode", len).entered();
        if len == 0 {
            return Vec::new();
        }

        let future = FutureTable::build(self.ctx, source, len);
        let beam = self.ctx.config.search.beam_size;
        let mut stacks: Vec<HypothesisStack> =
            (0..=len).map(|_| HypothesisStack::new(beam)).collect();

        stacks[0].add_scored(StackHypothesis {
            coverage: Coverage::new(len),
            end: 0,
            state: self.ctx.model.begin_sentence_state(),
            score: 0.0,
            future: future.span(0, len),
            history: AppliedId::NONE,
        });

        for count in 0..len {
            let mut stack = std::mem::replace(&mut stacks[count], HypothesisStack::new(0));
            stack.finalize();
            if stack.is_empty() {
                continue;
            }
            self.expand_stack(source, &stack, &future, &mut stacks);
        }

        self.extract_paths(&mut stacks[len])
    }

    /// One expansion round: gather candidates, batch-score through the
    /// pipeline, admit into target stacks.
    fn expand_stack(
        &mut self,
        source: &dyn PhraseSource,
        stack: &HypothesisStack,
        future: &FutureTable,
        stacks: &mut [HypothesisStack],
    ) {
        let limit = self.ctx.config.search.distortion_limit;
        let mut pending: Vec<Pending> = Vec::new();
        let mut cells: Vec<ScoreCell> = Vec::new();

        for (hi, hyp) in stack.iter().enumerate() {
            for gap in hyp.coverage.free_spans() {
                for start in gap.start..gap.end {
                    if limit >= 0 && (start as i64 - hyp.end as i64).abs() > limit as i64 {
                        continue;
                    }
                    for end in (start + 1)..=gap.end {
                        let span = Span::new(start, end);
                        for (oi, _) in source.options(span).iter().enumerate() {
                            pending.push(Pending {
                                hyp: hi,
                                span,
                                opt: oi,
                            });
                            cells.push(ScoreCell {
                                prob: 0.0,
                                state: hyp.state,
                                remaining: 0,
                            });
                        }
                    }
                }
            }
        }
        if pending.is_empty() {
            return;
        }

        // Distinct target stacks for this batch transition to Scoring
        // while pipeline work is outstanding.
        let mut targets: Vec<usize> = pending
            .iter()
            .map(|p| stack.get(p.hyp).coverage.covered() + p.span.width())
            .collect();
        targets.sort_unstable();
        targets.dedup();
        for &t in &targets {
            stacks[t].begin_scoring();
        }

        // Scoring phase: every candidate's words through one pipeline.
        for (ti, p) in pending.iter().enumerate() {
            cells[ti].remaining = source.options(p.span)[p.opt].words.len() as u32;
        }
        {
            let mut pipe = Pipeline::new(
                self.ctx.model,
                self.ctx.config.lm.pipeline_slots,
                |token, ret, state| {
                    let cell = &mut cells[token as usize];
                    cell.prob += ret.prob;
                    cell.state = state;
                    cell.remaining -= 1;
                },
            );
            for (ti, p) in pending.iter().enumerate() {
                let words = &source.options(p.span)[p.opt].words;
                if words.is_empty() {
                    continue;
                }
                let context = stack.get(p.hyp).state;
                pipe.begin_score(&context, words[0], ti as u64);
                for &w in &words[1..] {
                    pipe.append_word(w, ti as u64);
                }
            }
            pipe.drain();
        }

        // Admission phase: every candidate is fully scored now.
        for (p, cell) in pending.iter().zip(cells.iter()) {
            debug_assert_eq!(cell.remaining, 0, "admission with pending LM work");
            let hyp = stack.get(p.hyp);
            let opt = &source.options(p.span)[p.opt];
            let oov = opt.words.iter().filter(|&&w| w == UNK).count();

            let mut coverage = hyp.coverage.clone();
            coverage.set_range(p.span);
            let score = hyp.score
                + opt.score
                + self.ctx.lm_weight() * cell.prob
                + self.ctx.oov_weight() * oov as Score;
            let fut = future.of(&coverage);
            let children = if hyp.history.is_none() {
                Vec::new()
            } else {
                vec![hyp.history]
            };
            let id = self.arena.alloc(opt.note, score, p.span, &children);

            stacks[hyp.coverage.covered() + p.span.width()].add_scored(StackHypothesis {
                coverage,
                end: p.span.end,
                state: cell.state,
                score,
                future: fut,
                history: id,
            });
        }
        for &t in &targets {
            stacks[t].end_scoring();
        }
        debug!(candidates = pending.len(), "stack expanded");
    }

    /// Close the final stack, charge `</s>`, and materialize paths.
    fn extract_paths(&mut self, last: &mut HypothesisStack) -> Vec<PhrasePath> {
        last.finalize();
        let eos = self.ctx.model.eos_word();
        let mut finished: Vec<(Score, AppliedId)> = last
            .iter()
            .map(|h| {
                let (ret, _) = self.ctx.model.full_score(&h.state, eos);
                (h.score + self.ctx.lm_weight() * ret.prob, h.history)
            })
            .collect();
        finished.sort_by(|a, b| b.0.total_cmp(&a.0));
        finished.truncate(self.ctx.nbest());

        finished
            .into_iter()
            .map(|(score, id)| PhrasePath {
                score,
                phrases: self.backtrack(id),
            })
            .collect()
    }

    fn backtrack(&self, id: AppliedId) -> Vec<(Span, Note)> {
        let mut phrases = Vec::new();
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let node = self.arena.get(cur);
            phrases.push((node.span, node.note));
            cursor = node.children().first().copied();
        }
        phrases.reverse();
        phrases
    }
}

/// Admissible-ish estimate of the best score for each uncovered span:
/// the best single option per span (with a context-free LM estimate),
/// combined over splits by dynamic programming.
struct FutureTable {
    len: usize,
    /// `cost[start * (len + 1) + end]`
    cost: Vec<Score>,
}

impl FutureTable {
    fn build<M: NgramLookup>(
        ctx: &DecodingContext<'_, M>,
        source: &dyn PhraseSource,
        len: usize,
    ) -> FutureTable {
        let mut table = FutureTable {
            len,
            cost: vec![MINIMUM_SCORE; (len + 1) * (len + 1)],
        };
        for width in 1..=len {
            for start in 0..=(len - width) {
                let end = start + width;
                let mut best = MINIMUM_SCORE;
                for opt in source.options(Span::new(start, end)) {
                    let (lm_est, _) = ctx.model.score_sequence(&NGramState::empty(), &opt.words);
                    let oov = opt.words.iter().filter(|&&w| w == UNK).count();
                    let est = opt.score
                        + ctx.lm_weight() * lm_est
                        + ctx.oov_weight() * oov as Score;
                    if est > best {
                        best = est;
                    }
                }
                for mid in (start + 1)..end {
                    let split = table.span(start, mid) + table.span(mid, end);
                    if split > best {
                        best = split;
                    }
                }
                table.cost[start * (len + 1) + end] = best;
            }
        }
        table
    }

    fn span(&self, start: usize, end: usize) -> Score {
        if start == end {
            return 0.0;
        }
        self.cost[start * (self.len + 1) + end]
    }

    /// Estimate for everything a coverage bitmap leaves uncovered.
    fn of(&self, coverage: &Coverage) -> Score {
        coverage
            .free_spans()
            .iter()
            .map(|s| self.span(s.start, s.end))
            .sum()
    }
}
