//! Span-by-span chart decoding.
//!
//! Cells are filled bottom-up by width. For each span, the rule
//! applications supplied by the external [`RuleSource`] become hyperedges
//! whose non-terminal slots cursor into the vertices of narrower spans;
//! cube pruning emits the span's hypotheses, which are routed into one
//! vertex per left-hand-side label. The full span fills a single root
//! vertex regardless of label, and the n-best derivations are materialized
//! out of the applied arena.
//!
//! A span with no rules, or whose rules all reference empty child cells,
//! simply produces no vertices; dependents treat the missing cell as
//! unreachable. Unknown-word handling happens upstream in the option
//! collection, not here.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use crate::lm::NgramLookup;
use crate::vocab::WordId;

use super::applied::{AppliedArena, AppliedId, Derivation};
use super::context::DecodingContext;
use super::edge::PartialEdge;
use super::edge_generator::{EdgeGenerator, EdgeOutput};
use super::rule::{score_rule, NONTERMINAL};
use super::vertex::Vertex;
use super::vertex_generator::VertexGenerator;
use super::{Label, Note, Score, SearchError, Span};

/// One token of a rule body, in target order.
#[derive(Clone, Debug)]
pub enum RuleToken {
    Word(WordId),
    /// Reference to a child cell by source span and label.
    NonTerminal { start: usize, end: usize, label: Label },
}

/// A candidate rule application for one source span.
#[derive(Clone, Debug)]
pub struct RuleApplication {
    pub lhs: Label,
    pub body: Vec<RuleToken>,
    /// Pre-weighted feature score, excluding the language model.
    pub score: Score,
    pub note: Note,
}

/// External collaborator supplying translation options per span.
pub trait RuleSource {
    fn rules(&self, span: Span) -> &[RuleApplication];
}

type CellKey = (usize, usize, Label);

pub struct ChartManager<'c, M: NgramLookup> {
    ctx: &'c DecodingContext<'c, M>,
    arena: AppliedArena,
}

impl<'c, M: NgramLookup> ChartManager<'c, M> {
    pub fn new(ctx: &'c DecodingContext<'c, M>) -> Self {
        ChartManager {
            ctx,
            arena: AppliedArena::new(),
        }
    }

    /// Decode one sentence of `len` source positions, returning up to
    /// `nbest` derivations, best first. Pools are reset on entry, so a
    /// manager may be reused across sentences.
    pub fn decode(
        &mut self,
        source: &dyn RuleSource,
        len: usize,
    ) -> Result<Vec<Derivation>, SearchError> {
        self.arena.reset();
        let _span = debug_span!("chart_decode", len).entered();
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut cells: HashMap<CellKey, Vertex> = HashMap::new();
        for width in 1..len {
            for start in 0..=(len - width) {
                let span = Span::new(start, start + width);
                let mut by_label: HashMap<Label, VertexGenerator> = HashMap::new();
                {
                    let mut sink = LabelSink {
                        arena: &mut self.arena,
                        by_label: &mut by_label,
                    };
                    search_span(self.ctx, source, span, &cells, &mut sink)?;
                }
                for (label, gen) in by_label {
                    cells.insert((span.start, span.end, label), gen.finished_search());
                }
            }
        }

        // Root: everything into one vertex.
        let root_span = Span::new(0, len);
        let mut root_gen = VertexGenerator::new();
        {
            let mut sink = RootSink {
                arena: &mut self.arena,
                gen: &mut root_gen,
            };
            search_span(self.ctx, source, root_span, &cells, &mut sink)?;
        }
        let root = root_gen.finished_search();
        debug!(reachable = !root.empty(), "root frozen");

        Ok(root
            .extract(self.ctx.nbest())
            .into_iter()
            .map(|(_, id)| self.arena.materialize(id))
            .collect())
    }
}

struct LabelSink<'s> {
    arena: &'s mut AppliedArena,
    by_label: &'s mut HashMap<Label, VertexGenerator>,
}

impl EdgeOutput for LabelSink<'_> {
    fn new_hypothesis(&mut self, edge: &PartialEdge<'_>) {
        let id = record(self.arena, edge);
        self.by_label
            .entry(edge.label())
            .or_default()
            .new_hypothesis(*edge.state(), edge.score(), id);
    }
}

struct RootSink<'s> {
    arena: &'s mut AppliedArena,
    gen: &'s mut VertexGenerator,
}

impl EdgeOutput for RootSink<'_> {
    fn new_hypothesis(&mut self, edge: &PartialEdge<'_>) {
        let id = record(self.arena, edge);
        self.gen.new_hypothesis(*edge.state(), edge.score(), id);
    }
}

fn record(arena: &mut AppliedArena, edge: &PartialEdge<'_>) -> AppliedId {
    let mut children = [AppliedId::NONE; 2];
    for i in 0..edge.arity() {
        children[i] = edge.nt_history(i);
    }
    arena.alloc(
        edge.note(),
        edge.score(),
        edge.span(),
        &children[..edge.arity()],
    )
}

/// Build this span's edges and run cube pruning into `output`.
fn search_span<M: NgramLookup, O: EdgeOutput>(
    ctx: &DecodingContext<'_, M>,
    source: &dyn RuleSource,
    span: Span,
    cells: &HashMap<CellKey, Vertex>,
    output: &mut O,
) -> Result<(), SearchError> {
    let mut generator = EdgeGenerator::new();
    let mut skipped = 0usize;
    for rule in source.rules(span) {
        match build_edge(ctx, rule, span, cells)? {
            Some(edge) => generator.add_edge(ctx, edge),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(start = span.start, end = span.end, skipped, "rules over unreachable children");
    }
    generator.search(ctx, output);
    Ok(())
}

/// Turn one rule application into a seeded edge, or `None` when a child
/// cell is missing or empty (the rule is unreachable, not an error).
fn build_edge<'v, M: NgramLookup>(
    ctx: &DecodingContext<'_, M>,
    rule: &RuleApplication,
    span: Span,
    cells: &'v HashMap<CellKey, Vertex>,
) -> Result<Option<PartialEdge<'v>>, SearchError> {
    let arity = rule
        .body
        .iter()
        .filter(|t| matches!(t, RuleToken::NonTerminal { .. }))
        .count();
    if arity > 2 {
        return Err(SearchError::ArityTooLarge { arity });
    }

    let mut edge = PartialEdge::new(rule.note, rule.lhs, span);
    let mut words: Vec<WordId> = Vec::with_capacity(rule.body.len());
    let mut below: Score = 0.0;

    for token in &rule.body {
        match token {
            RuleToken::Word(w) => words.push(*w),
            RuleToken::NonTerminal { start, end, label } => {
                if *end <= *start
                    || *start < span.start
                    || *end > span.end
                    || end - start >= span.width()
                {
                    return Err(SearchError::ChildOutsideSpan {
                        start: *start,
                        end: *end,
                    });
                }
                let vertex = match cells.get(&(*start, *end, *label)) {
                    Some(v) if !v.empty() => v,
                    _ => return Ok(None),
                };
                let cursor = vertex.root_partial();
                below += cursor.bound();
                edge.push_nt(cursor);
                words.push(NONTERMINAL);
            }
        }
    }

    // A leading <s> anchors the first terminal run at the sentence start.
    let prepend_bos = words.first() == Some(&ctx.model.bos_word());
    let run_words = if prepend_bos { &words[1..] } else { &words[..] };

    let mut between = Vec::with_capacity(arity + 1);
    let scored = score_rule(ctx.model, run_words, prepend_bos, &mut between);
    edge.set_between(&between);
    edge.set_score(
        rule.score
            + below
            + ctx.lm_weight() * scored.prob
            + ctx.oov_weight() * scored.oov as Score,
    );
    Ok(Some(edge))
}
