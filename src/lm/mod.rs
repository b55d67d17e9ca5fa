//! N-gram language model storage and incremental scoring.
//!
//! `HashedModel` stores ARPA-derived n-grams in probing hash tables keyed by
//! an incremental context hash. Scoring comes in two forms with identical
//! semantics: the one-shot `full_score` on [`NgramLookup`], and the
//! automaton/pipeline pair, which interleaves the lookups of many in-flight
//! scoring requests so their memory stalls overlap.

pub mod arpa;
pub mod automaton;
pub mod model;
mod model_io;
pub mod pipeline;
pub mod state;

pub use model::{FullScoreReturn, HashedModel, MiddleEntry, NgramLookup, Node, UnigramEntry};
pub use state::{ChartState, LeftContext, NGramState, MAX_CONTEXT, MAX_ORDER};

use std::io;

/// Lowest model order the scorer supports. Below 3, the automaton's chain
/// degenerates (the unigram step would feed straight into the longest
/// lookup) and would need bigram special cases throughout; construction
/// rejects such models instead.
pub const MIN_ORDER: u8 = 3;

/// Unified error type for model construction and binary I/O.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected PHLM)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch (file corrupt?)")]
    ChecksumMismatch,

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error("ARPA parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("model order {order} is below the supported minimum of {MIN_ORDER}")]
    OrderTooSmall { order: u8 },

    #[error("model order {order} exceeds the compiled maximum of {max}", max = MAX_ORDER)]
    OrderTooLarge { order: u8 },
}
