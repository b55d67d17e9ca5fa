//! Vertex tries: best-first access to the derivations of one cell.
//!
//! A frozen vertex organizes its hypotheses (already deduplicated by
//! boundary state) into a trie keyed on boundary words: left words first,
//! then a left-resolved sentinel, then right words, then a final sentinel.
//! Children are built lazily on first descent and partition the parent's
//! hypotheses on the next differing key element, skipping any run of
//! shared elements. A cursor into the trie exposes an admissible bound
//! (the best score in its subtree) and splits into its best child plus a
//! next-best sibling, which is exactly the neighbor generation cube
//! pruning needs.

use std::sync::OnceLock;

use crate::lm::ChartState;

use super::applied::AppliedId;
use super::{Score, MINIMUM_SCORE};

/// One recombined hypothesis: boundary state, score, derivation handle.
#[derive(Clone, Copy, Debug)]
pub struct HypoState {
    pub state: ChartState,
    pub score: Score,
    pub history: AppliedId,
}

// Key sentinels; word ids are well below 2^33.
const LEFT_DONE_OPEN: u64 = 1 << 33;
const LEFT_DONE_FULL: u64 = (1 << 33) + 1;
const RIGHT_DONE: u64 = (1 << 33) + 2;

fn key_element(state: &ChartState, depth: usize) -> u64 {
    let ll = state.left.len();
    if depth < ll {
        state.left.words[depth] as u64
    } else if depth == ll {
        if state.left.full {
            LEFT_DONE_FULL
        } else {
            LEFT_DONE_OPEN
        }
    } else {
        let r = depth - ll - 1;
        if r < state.right.len() {
            state.right.words[r] as u64
        } else {
            RIGHT_DONE
        }
    }
}

pub struct VertexNode {
    /// Sorted descending by score; all share the key prefix `..depth`.
    hypos: Vec<HypoState>,
    depth: usize,
    bound: Score,
    children: OnceLock<Box<[VertexNode]>>,
}

impl VertexNode {
    fn new(hypos: Vec<HypoState>, depth: usize) -> Self {
        debug_assert!(hypos.windows(2).all(|w| w[0].score >= w[1].score));
        let bound = hypos.first().map(|h| h.score).unwrap_or(MINIMUM_SCORE);
        VertexNode {
            hypos,
            depth,
            bound,
            children: OnceLock::new(),
        }
    }

    pub fn bound(&self) -> Score {
        self.bound
    }

    pub fn empty(&self) -> bool {
        self.hypos.is_empty()
    }

    /// A node narrowed to a single hypothesis has a fully determined state.
    pub fn complete(&self) -> bool {
        self.hypos.len() == 1
    }

    fn best(&self) -> &HypoState {
        &self.hypos[0]
    }

    fn children(&self) -> &[VertexNode] {
        self.children.get_or_init(|| self.build_extend())
    }

    /// Partition hypotheses on the next differing key element.
    fn build_extend(&self) -> Box<[VertexNode]> {
        debug_assert!(self.hypos.len() > 1);
        // Skip key elements shared by every hypothesis; dedup guarantees
        // distinct states, so a differing element exists.
        let mut d = self.depth;
        loop {
            let first = key_element(&self.hypos[0].state, d);
            if self.hypos[1..]
                .iter()
                .all(|h| key_element(&h.state, d) == first)
            {
                d += 1;
            } else {
                break;
            }
        }

        // Stable partition keeps each group sorted by score.
        let mut groups: Vec<(u64, Vec<HypoState>)> = Vec::new();
        for h in &self.hypos {
            let e = key_element(&h.state, d);
            match groups.iter_mut().find(|(k, _)| *k == e) {
                Some((_, v)) => v.push(*h),
                None => groups.push((e, vec![*h])),
            }
        }
        let mut children: Vec<VertexNode> = groups
            .into_iter()
            .map(|(_, v)| VertexNode::new(v, d + 1))
            .collect();
        children.sort_by(|a, b| b.bound.total_cmp(&a.bound));
        children.into_boxed_slice()
    }

    /// Overwrite the advertised bound, breaking admissibility on purpose.
    /// Exists to demonstrate that cube pruning's ordering guarantee rests
    /// on sound bounds.
    #[cfg(test)]
    pub(crate) fn rig_bound(&mut self, bound: Score) {
        self.bound = bound;
    }
}

/// Cursor into a vertex trie: "the `index`-th best not-yet-fully-specified
/// choice under `node`".
#[derive(Clone, Copy)]
pub struct PartialVertex<'a> {
    node: &'a VertexNode,
    index: usize,
}

impl<'a> PartialVertex<'a> {
    fn new(node: &'a VertexNode) -> Self {
        PartialVertex { node, index: 0 }
    }

    pub fn empty(&self) -> bool {
        self.node.empty()
    }

    pub fn complete(&self) -> bool {
        self.node.complete()
    }

    /// Admissible upper bound on any completion reachable from here.
    pub fn bound(&self) -> Score {
        if self.node.complete() || self.index == 0 {
            // children()[0] shares the node bound; avoid forcing the build.
            return self.node.bound();
        }
        self.node.children()[self.index].bound()
    }

    /// How much boundary context this cursor has already revealed; the
    /// cube-pruning victim heuristic prefers the least-revealed slot.
    pub fn length(&self) -> usize {
        self.node.depth
    }

    pub fn state(&self) -> &ChartState {
        debug_assert!(self.complete());
        &self.node.best().state
    }

    pub fn history(&self) -> AppliedId {
        debug_assert!(self.complete());
        self.node.best().history
    }

    pub fn score(&self) -> Score {
        debug_assert!(self.complete());
        self.node.best().score
    }

    /// Descend into the current best child; returns the next-best sibling
    /// cursor when one exists. Calling this on a complete cursor is a
    /// contract violation.
    pub fn split(&mut self) -> Option<PartialVertex<'a>> {
        debug_assert!(!self.complete(), "split on a complete vertex cursor");
        debug_assert!(!self.empty(), "split on an empty vertex");
        let children = self.node.children();
        let alternative = (self.index + 1 < children.len()).then(|| PartialVertex {
            node: self.node,
            index: self.index + 1,
        });
        self.node = &children[self.index];
        self.index = 0;
        alternative
    }
}

/// Frozen per-cell collection of derivations, queryable by dependents.
pub struct Vertex {
    root: VertexNode,
}

impl Vertex {
    pub(crate) fn from_hypos(mut hypos: Vec<HypoState>) -> Self {
        hypos.sort_by(|a, b| b.score.total_cmp(&a.score));
        Vertex {
            root: VertexNode::new(hypos, 0),
        }
    }

    /// Vertex for a cell with no derivations; bounds report negative
    /// infinity so dependents treat it as unreachable.
    pub fn empty_vertex() -> Self {
        Vertex::from_hypos(Vec::new())
    }

    pub fn bound(&self) -> Score {
        self.root.bound()
    }

    pub fn empty(&self) -> bool {
        self.root.empty()
    }

    pub fn root_partial(&self) -> PartialVertex<'_> {
        PartialVertex::new(&self.root)
    }

    /// Single best derivation, if any.
    pub fn best_child(&self) -> Option<(Score, AppliedId)> {
        self.root.hypos.first().map(|h| (h.score, h.history))
    }

    /// Up to `n` best derivations over distinct boundary states.
    pub fn extract(&self, n: usize) -> Vec<(Score, AppliedId)> {
        self.root
            .hypos
            .iter()
            .take(n)
            .map(|h| (h.score, h.history))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn rig_root_bound(&mut self, bound: Score) {
        self.root.rig_bound(bound);
    }
}
