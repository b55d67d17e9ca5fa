//! Shared, immutable decoding context.
//!
//! Weights, limits, and the model handle are constructed once per run and
//! passed by reference into the search core; nothing reads ambient global
//! state.

use crate::config::DecodeConfig;
use crate::lm::NgramLookup;

use super::Score;

pub struct DecodingContext<'a, M: NgramLookup> {
    pub config: &'a DecodeConfig,
    pub model: &'a M,
}

impl<'a, M: NgramLookup> DecodingContext<'a, M> {
    pub fn new(config: &'a DecodeConfig, model: &'a M) -> Self {
        DecodingContext { config, model }
    }

    pub fn lm_weight(&self) -> Score {
        self.config.lm.weight
    }

    pub fn oov_weight(&self) -> Score {
        self.config.lm.oov_weight
    }

    pub fn pop_limit(&self) -> usize {
        self.config.search.pop_limit
    }

    pub fn nbest(&self) -> usize {
        self.config.search.nbest
    }
}
