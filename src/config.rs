//! Decoding configuration loaded from TOML.
//!
//! Unlike a global settings singleton, the parsed [`DecodeConfig`] is owned
//! by the caller and travels into the search core inside a
//! [`DecodingContext`](crate::search::DecodingContext); nothing in this
//! crate reads ambient state. Default values are embedded via
//! `include_str!("default_config.toml")`.

use serde::Deserialize;

pub const DEFAULT_CONFIG_TOML: &str = include_str!("default_config.toml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecodeConfig {
    pub search: SearchSettings,
    pub lm: LmSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    /// Cube-pruning pop limit per cell.
    pub pop_limit: usize,
    /// Derivations returned from the root vertex.
    pub nbest: usize,
    /// Stack beam width for phrase-based decoding.
    pub beam_size: usize,
    /// Maximum reordering jump; negative disables the limit.
    pub distortion_limit: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LmSettings {
    /// Weight multiplied into language model log10 probabilities.
    pub weight: f32,
    /// Weight multiplied into the per-hypothesis OOV count.
    pub oov_weight: f32,
    /// Automaton slots in the scoring pipeline.
    pub pipeline_slots: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        parse_config_toml(DEFAULT_CONFIG_TOML).expect("embedded default config TOML must be valid")
    }
}

impl DecodeConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        parse_config_toml(toml_str)
    }
}

pub fn parse_config_toml(toml_str: &str) -> Result<DecodeConfig, ConfigError> {
    let c: DecodeConfig =
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&c)?;
    Ok(c)
}

fn validate(c: &DecodeConfig) -> Result<(), ConfigError> {
    macro_rules! check_positive {
        ($section:ident . $field:ident) => {
            if c.$section.$field == 0 {
                return Err(ConfigError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }

    check_positive!(search.pop_limit);
    check_positive!(search.nbest);
    check_positive!(search.beam_size);
    check_positive!(lm.pipeline_slots);

    if !c.lm.weight.is_finite() {
        return Err(ConfigError::InvalidValue {
            field: "lm.weight".to_string(),
            reason: "must be finite".to_string(),
        });
    }
    if !c.lm.oov_weight.is_finite() {
        return Err(ConfigError::InvalidValue {
            field: "lm.oov_weight".to_string(),
            reason: "must be finite".to_string(),
        });
    }

    Ok(())
}
