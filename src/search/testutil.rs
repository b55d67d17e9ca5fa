//! Shared fixtures for search tests.

use std::collections::HashMap;

use crate::config::DecodeConfig;
use crate::lm::{ChartState, HashedModel, NGramState};
use crate::vocab::WordId;

use super::chart::{RuleApplication, RuleSource};
use super::phrase::{PhraseOption, PhraseSource};
use super::{Note, Score, Span};

/// Order-3 model whose only content is uniform unigrams: every word the
/// same log10 probability, no higher-order entries, no backoff. Scores
/// through it are insensitive to context, which makes cube-pruning order
/// assertions exact.
pub(crate) fn uniform_model(words: &[&str], logp: f32) -> HashedModel {
    let mut list: Vec<&str> = vec!["<unk>", "<s>", "</s>"];
    for w in words {
        if !list.contains(w) {
            list.push(w);
        }
    }
    let mut arpa = String::from("\\data\\\n");
    arpa.push_str(&format!("ngram 1={}\n", list.len()));
    arpa.push_str("ngram 2=0\nngram 3=0\n\n\\1-grams:\n");
    for w in &list {
        arpa.push_str(&format!("{logp}\t{w}\n"));
    }
    arpa.push_str("\n\\2-grams:\n\n\\3-grams:\n\n\\end\\\n");
    HashedModel::from_arpa_reader(arpa.as_bytes()).unwrap()
}

/// The non-uniform order-3 model shared with the lm tests.
pub(crate) fn tiny_model() -> HashedModel {
    crate::lm::model::tests::tiny_model()
}

pub(crate) fn test_config() -> DecodeConfig {
    DecodeConfig::default()
}

/// A chart state with empty left boundary and the given right words; handy
/// for building vertices whose merge adjustments are exactly zero.
pub(crate) fn right_only_state(words: &[WordId]) -> ChartState {
    let mut right = NGramState::empty();
    for (i, &w) in words.iter().enumerate() {
        right.words[i] = w;
    }
    right.length = words.len() as u8;
    ChartState {
        left: crate::lm::LeftContext::empty(),
        right,
    }
}

#[derive(Default)]
pub(crate) struct TableRuleSource {
    rules: HashMap<(usize, usize), Vec<RuleApplication>>,
    empty: Vec<RuleApplication>,
}

impl TableRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, start: usize, end: usize, rule: RuleApplication) {
        self.rules.entry((start, end)).or_default().push(rule);
    }
}

impl RuleSource for TableRuleSource {
    fn rules(&self, span: Span) -> &[RuleApplication] {
        self.rules
            .get(&(span.start, span.end))
            .map(|v| v.as_slice())
            .unwrap_or(&self.empty)
    }
}

#[derive(Default)]
pub(crate) struct TablePhraseSource {
    options: HashMap<(usize, usize), Vec<PhraseOption>>,
    empty: Vec<PhraseOption>,
}

impl TablePhraseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, start: usize, end: usize, words: Vec<WordId>, score: Score, note: Note) {
        self.options.entry((start, end)).or_default().push(PhraseOption {
            span: Span::new(start, end),
            words,
            score,
            note,
        });
    }
}

impl PhraseSource for TablePhraseSource {
    fn options(&self, span: Span) -> &[PhraseOption] {
        self.options
            .get(&(span.start, span.end))
            .map(|v| v.as_slice())
            .unwrap_or(&self.empty)
    }
}
