//! All configurable parameters for the generation engine.

use crate::error::ConfigError;

/// Key/value cache allocation strategy.
///
/// Selected once per engine instance and fixed thereafter; the cache store
/// is constructed from the resolved value and never branches on it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// One monolithic buffer for the whole cohort, recomputed over the full
    /// growing sequence each step. No slot reuse, no eviction. Required for
    /// quantized weight encodings, which cannot be sliced per request.
    Naive,
    /// Fixed-capacity slot pool; each request is bound to one slot for its
    /// lifetime.
    Contiguous,
    /// Fixed-capacity slot pool with per-step admission and eviction of
    /// individual requests.
    Continuous,
}

impl CacheStrategy {
    /// Whether this strategy reserves one cache slot per resident request.
    pub fn is_slot_based(self) -> bool {
        matches!(self, Self::Contiguous | Self::Continuous)
    }
}

/// Which side of a short row receives pad tokens during batch packing.
///
/// Affects only packing and position selection, never cache semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingDirection {
    #[default]
    Left,
    Right,
}

/// Storage encoding of the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum WeightEncoding {
    Float32,
    Bfloat16,
    Q4_0,
    Q4K,
    Q6K,
}

impl WeightEncoding {
    /// Full- or half-precision encodings support per-request random-access
    /// slicing of the cache; quantized encodings do not.
    pub fn is_exact(self) -> bool {
        matches!(self, Self::Float32 | Self::Bfloat16)
    }
}

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum length of a token sequence, prompt included.
    pub max_length: usize,

    /// Default cap on newly generated tokens per request, prompt excluded.
    /// `None` lets requests run to `max_length`.
    pub max_new_tokens: Option<usize>,

    /// Maximum number of requests resident in the cache concurrently.
    pub max_cache_batch_size: usize,

    /// Weight storage encoding of the served model.
    pub encoding: WeightEncoding,

    /// Explicit cache strategy request, overriding the default.
    pub strategy_override: Option<CacheStrategy>,

    /// Strategy used when no override is given.
    pub default_strategy: CacheStrategy,

    /// Side on which short rows are padded during batch packing.
    pub padding: PaddingDirection,

    /// Token id used to fill pad positions.
    pub pad_token_id: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_length: 512,
            max_new_tokens: None,
            max_cache_batch_size: 16,
            encoding: WeightEncoding::Float32,
            strategy_override: None,
            default_strategy: CacheStrategy::Continuous,
            padding: PaddingDirection::Left,
            pad_token_id: 0,
        }
    }
}

impl EngineConfig {
    /// Resolve the cache strategy for this configuration.
    ///
    /// A quantized weight encoding forces [`CacheStrategy::Naive`] even
    /// over an explicit override; otherwise the override wins, then the
    /// requested default.
    pub fn resolved_strategy(&self) -> CacheStrategy {
        if !self.encoding.is_exact() {
            return CacheStrategy::Naive;
        }
        if let Some(strategy) = self.strategy_override {
            return strategy;
        }
        self.default_strategy
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_length == 0 {
            return Err(ConfigError::ZeroField {
                field: "max_length",
            });
        }
        if self.max_cache_batch_size == 0 {
            return Err(ConfigError::ZeroField {
                field: "max_cache_batch_size",
            });
        }
        Ok(())
    }
}
