//! N-gram model storage and the one-shot scorer.
//!
//! Lookups follow a longest-match chain: unigram for the new word, then
//! successively higher-order entries keyed by an incremental context hash
//! ([`Node`]). Each lookup comes as a prefetch/retrieve pair so backends
//! with cache-hostile tables can issue the memory access one step ahead;
//! [`HashedModel`]'s prefetches are no-ops, but the automaton drives the
//! interface as if they were real.

use std::collections::HashMap;
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use super::arpa::{read_arpa, ArpaFile};
use super::state::{NGramState, MAX_ORDER};
use super::{LmError, MIN_ORDER};
use crate::vocab::{Vocab, WordId, BOS_WORD, EOS_WORD};

/// Running context-hash key for chained lookups.
pub type Node = u64;

/// Result of scoring one word against a context.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullScoreReturn {
    /// log10 probability, with unmatched-context backoff already applied.
    pub prob: f32,
    /// Length of the matched n-gram, including the new word.
    pub ngram_length: u8,
    /// True when no additional left context can change `prob`.
    pub independent_left: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct ProbBackoff {
    prob: f32,
    backoff: f32,
    /// Some higher-order entry has this n-gram as its context.
    extends_right: bool,
    /// Some higher-order entry has this n-gram as its suffix.
    extends_left: bool,
}

impl ProbBackoff {
    fn absent_unk() -> Self {
        // Penalty probability for models that do not list <unk>.
        ProbBackoff {
            prob: -100.0,
            backoff: 0.0,
            extends_right: false,
            extends_left: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UnigramEntry {
    pub prob: f32,
    pub backoff: f32,
    pub extends_right: bool,
    pub extends_left: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct MiddleEntry {
    pub prob: f32,
    pub backoff: f32,
    pub extends_right: bool,
    pub extends_left: bool,
}

/// Queryable n-gram model with two-phase (prefetch, retrieve) lookups.
///
/// `lookup_unigram` resets the node to the new word; `lookup_middle`
/// extends the node with one more context word (oldest-ward) and probes the
/// table of the corresponding order; `lookup_longest` probes the
/// maximum-order table without keeping a node (nothing chains past it).
pub trait NgramLookup {
    fn order(&self) -> u8;

    fn bos_word(&self) -> WordId;
    fn eos_word(&self) -> WordId;

    /// State anchored at `<s>`: context `[<s>]` with its backoff weight.
    fn begin_sentence_state(&self) -> NGramState;

    fn prefetch_unigram(&self, _word: WordId) {}
    fn lookup_unigram(&self, word: WordId, node: &mut Node) -> UnigramEntry;

    fn prefetch_middle(&self, _order_minus_2: u8, _word: WordId, _node: Node) {}
    fn lookup_middle(&self, order_minus_2: u8, word: WordId, node: &mut Node)
        -> Option<MiddleEntry>;

    fn prefetch_longest(&self, _word: WordId, _node: Node) {}
    fn lookup_longest(&self, word: WordId, node: Node) -> Option<f32>;

    /// One-shot scorer: longest-match probability for `word` given
    /// `context`, with backoff charged for unmatched context suffixes, and
    /// the successor context state.
    fn full_score(&self, context: &NGramState, word: WordId) -> (FullScoreReturn, NGramState) {
        let order = self.order() as usize;
        let in_len = (context.length as usize).min(order - 1);

        let mut node: Node = 0;
        let uni = self.lookup_unigram(word, &mut node);
        let mut ret = FullScoreReturn {
            prob: uni.prob,
            ngram_length: 1,
            independent_left: !uni.extends_left,
        };

        let mut out = NGramState::empty();
        out.words[0] = word;
        out.backoff[0] = uni.backoff;
        let keep = in_len.min(order - 2);
        out.words[1..=keep].copy_from_slice(&context.words[..keep]);

        let mut out_len = (in_len + 1).min(order - 1);
        if !uni.extends_right {
            out_len = 0;
        }

        if !ret.independent_left {
            for i in 0..in_len {
                let matched = i + 2;
                if matched < order {
                    match self.lookup_middle(i as u8, context.words[i], &mut node) {
                        Some(m) => {
                            ret.prob = m.prob;
                            ret.ngram_length = matched as u8;
                            out.backoff[matched - 1] = m.backoff;
                            if !m.extends_right {
                                out_len = out_len.min(matched - 1);
                            }
                            if !m.extends_left {
                                ret.independent_left = true;
                                break;
                            }
                        }
                        None => {
                            ret.independent_left = true;
                            break;
                        }
                    }
                } else {
                    if let Some(p) = self.lookup_longest(context.words[i], node) {
                        ret.prob = p;
                        ret.ngram_length = order as u8;
                    }
                    ret.independent_left = true;
                    break;
                }
            }
        }

        for j in (ret.ngram_length as usize - 1)..in_len {
            ret.prob += context.backoff[j];
        }

        out.length = out_len.min(ret.ngram_length as usize) as u8;
        (ret, out)
    }

    /// Score a word sequence left to right, returning the total log10
    /// probability and the final context state.
    fn score_sequence(&self, context: &NGramState, words: &[WordId]) -> (f32, NGramState) {
        let mut state = *context;
        let mut total = 0.0;
        for &w in words {
            let (ret, next) = self.full_score(&state, w);
            total += ret.prob;
            state = next;
        }
        (total, state)
    }
}

fn base_hash(word: WordId) -> Node {
    mix(0x517c_c1b7_2722_0a95 ^ word as u64)
}

pub(crate) fn combine_hash(node: Node, word: WordId) -> Node {
    mix(node
        .rotate_left(23)
        .wrapping_add((word as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)))
}

fn mix(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h
}

/// Probing hash-table model built from ARPA input.
#[derive(Debug, Serialize, Deserialize)]
pub struct HashedModel {
    order: u8,
    vocab: Vocab,
    unigrams: Vec<ProbBackoff>,
    /// `middle[o]` holds the (o+2)-grams.
    middle: Vec<HashMap<Node, ProbBackoff>>,
    longest: HashMap<Node, f32>,
    bos: WordId,
    eos: WordId,
}

impl HashedModel {
    pub fn from_arpa_reader<R: BufRead>(reader: R) -> Result<Self, LmError> {
        let arpa = read_arpa(reader)?;
        Self::from_arpa(arpa)
    }

    pub fn from_arpa(arpa: ArpaFile) -> Result<Self, LmError> {
        let order = arpa.order();
        if order < MIN_ORDER {
            return Err(LmError::OrderTooSmall { order });
        }
        if order as usize > MAX_ORDER {
            return Err(LmError::OrderTooLarge { order });
        }
        let _span = debug_span!("build_model", order).entered();

        let mut vocab = Vocab::new();
        let mut unigrams = vec![ProbBackoff::absent_unk()];
        for entry in &arpa.sections[0] {
            let id = vocab.intern(&entry.words[0]);
            let pb = ProbBackoff {
                prob: entry.prob,
                backoff: entry.backoff,
                extends_right: false,
                extends_left: false,
            };
            if (id as usize) < unigrams.len() {
                if id != crate::vocab::UNK || entry.words[0] != crate::vocab::UNK_WORD {
                    return Err(LmError::Parse {
                        line: 0,
                        reason: format!("duplicate unigram '{}'", entry.words[0]),
                    });
                }
                unigrams[0] = pb;
            } else {
                unigrams.push(pb);
            }
        }

        let bos = vocab.try_get(BOS_WORD).ok_or_else(|| LmError::Parse {
            line: 0,
            reason: "model lacks <s>".to_string(),
        })?;
        let eos = vocab.try_get(EOS_WORD).ok_or_else(|| LmError::Parse {
            line: 0,
            reason: "model lacks </s>".to_string(),
        })?;

        let mut model = HashedModel {
            order,
            vocab,
            unigrams,
            middle: vec![HashMap::new(); (order as usize).saturating_sub(2)],
            longest: HashMap::new(),
            bos,
            eos,
        };

        for (section_idx, section) in arpa.sections.iter().enumerate().skip(1) {
            let n = section_idx + 1;
            for entry in section {
                let mut ids = Vec::with_capacity(n);
                for w in &entry.words {
                    ids.push(model.vocab.try_get(w).ok_or_else(|| LmError::Parse {
                        line: 0,
                        reason: format!("{n}-gram uses word '{w}' absent from unigrams"),
                    })?);
                }

                let key = ngram_key(&ids);
                if n < order as usize {
                    model.middle[n - 2].insert(
                        key,
                        ProbBackoff {
                            prob: entry.prob,
                            backoff: entry.backoff,
                            extends_right: false,
                            extends_left: false,
                        },
                    );
                } else {
                    model.longest.insert(key, entry.prob);
                }

                // The context prefix must exist or the lookup chain could
                // never reach this entry.
                model
                    .mark_extends_right(&ids[..n - 1])
                    .ok_or_else(|| LmError::Parse {
                        line: 0,
                        reason: format!("{n}-gram context missing for '{}'", entry.words.join(" ")),
                    })?;
                model
                    .mark_extends_left(&ids[1..])
                    .ok_or_else(|| LmError::Parse {
                        line: 0,
                        reason: format!("{n}-gram suffix missing for '{}'", entry.words.join(" ")),
                    })?;
            }
        }

        // A nonzero backoff must survive in successor states even when no
        // higher-order entry extends the n-gram, so treat it as extendable.
        for pb in &mut model.unigrams {
            if pb.backoff != 0.0 {
                pb.extends_right = true;
            }
        }
        for table in &mut model.middle {
            for pb in table.values_mut() {
                if pb.backoff != 0.0 {
                    pb.extends_right = true;
                }
            }
        }

        debug!(
            vocab = model.vocab.len(),
            longest = model.longest.len(),
            "model built"
        );
        Ok(model)
    }

    fn mark_extends_right(&mut self, ids: &[WordId]) -> Option<()> {
        self.entry_mut(ids).map(|pb| pb.extends_right = true)
    }

    fn mark_extends_left(&mut self, ids: &[WordId]) -> Option<()> {
        self.entry_mut(ids).map(|pb| pb.extends_left = true)
    }

    fn entry_mut(&mut self, ids: &[WordId]) -> Option<&mut ProbBackoff> {
        match ids.len() {
            1 => self.unigrams.get_mut(ids[0] as usize),
            n => self.middle[n - 2].get_mut(&ngram_key(ids)),
        }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn bos(&self) -> WordId {
        self.bos
    }

    pub fn eos(&self) -> WordId {
        self.eos
    }
}

/// Key of an n-gram given oldest-first word ids: newest word seeds the
/// node, context words chain on newest-to-oldest, matching the lookup
/// sequence.
fn ngram_key(ids: &[WordId]) -> Node {
    let mut node = base_hash(ids[ids.len() - 1]);
    for &w in ids[..ids.len() - 1].iter().rev() {
        node = combine_hash(node, w);
    }
    node
}

impl NgramLookup for HashedModel {
    fn order(&self) -> u8 {
        self.order
    }

    fn bos_word(&self) -> WordId {
        self.bos
    }

    fn eos_word(&self) -> WordId {
        self.eos
    }

    fn begin_sentence_state(&self) -> NGramState {
        let mut s = NGramState::empty();
        s.words[0] = self.bos;
        s.backoff[0] = self.unigrams[self.bos as usize].backoff;
        s.length = 1;
        s
    }

    fn lookup_unigram(&self, word: WordId, node: &mut Node) -> UnigramEntry {
        *node = base_hash(word);
        let pb = self
            .unigrams
            .get(word as usize)
            .copied()
            .unwrap_or_else(ProbBackoff::absent_unk);
        UnigramEntry {
            prob: pb.prob,
            backoff: pb.backoff,
            extends_right: pb.extends_right,
            extends_left: pb.extends_left,
        }
    }

    fn lookup_middle(
        &self,
        order_minus_2: u8,
        word: WordId,
        node: &mut Node,
    ) -> Option<MiddleEntry> {
        *node = combine_hash(*node, word);
        self.middle[order_minus_2 as usize]
            .get(node)
            .map(|pb| MiddleEntry {
                prob: pb.prob,
                backoff: pb.backoff,
                extends_right: pb.extends_right,
                extends_left: pb.extends_left,
            })
    }

    fn lookup_longest(&self, word: WordId, node: Node) -> Option<f32> {
        self.longest.get(&combine_hash(node, word)).copied()
    }
}
