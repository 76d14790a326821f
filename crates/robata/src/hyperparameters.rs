//! Static model shape description.

use crate::error::ConfigError;

/// Model hyperparameters.
///
/// Pure data describing the shape of the served model; validated once at
/// engine construction and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Hyperparameters {
    /// Maximum length of the token sequence that can be processed by this model.
    pub seq_len: usize,

    /// Number of attention layers.
    pub n_layers: usize,

    /// Number of query heads per attention layer.
    pub n_heads: usize,

    /// Number of key and value heads per attention layer.
    pub n_kv_heads: usize,

    /// Number of tokens in the vocabulary. A negative value is a sentinel
    /// meaning "use the tokenizer's vocabulary size"; older model files
    /// ship without it.
    pub vocab_size: i64,

    /// Hidden dimension of embedded tokens.
    pub hidden_dim: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            seq_len: 2048,
            n_layers: 32,
            n_heads: 32,
            n_kv_heads: 8,
            vocab_size: 128256,
            hidden_dim: 4096,
        }
    }
}

impl Hyperparameters {
    /// Dimension of each attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.n_heads
    }

    /// Dimension of the key and value attention weights.
    pub fn kv_weight_dim(&self) -> usize {
        self.head_dim() * self.n_kv_heads
    }

    /// Vocabulary size with the sentinel applied.
    pub fn resolved_vocab_size(&self, tokenizer_vocab: usize) -> usize {
        if self.vocab_size < 0 {
            tokenizer_vocab
        } else {
            self.vocab_size as usize
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("seq_len", self.seq_len),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("n_kv_heads", self.n_kv_heads),
            ("hidden_dim", self.hidden_dim),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroField { field });
            }
        }
        if self.hidden_dim % self.n_heads != 0 {
            return Err(ConfigError::UnevenHeads {
                hidden_dim: self.hidden_dim,
                n_heads: self.n_heads,
            });
        }
        if self.n_heads % self.n_kv_heads != 0 {
            return Err(ConfigError::UnevenKvHeads {
                n_heads: self.n_heads,
                n_kv_heads: self.n_kv_heads,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let params = Hyperparameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.head_dim(), 128);
        assert_eq!(params.kv_weight_dim(), 1024);
    }

    #[test]
    fn sentinel_vocab_defers_to_tokenizer() {
        let params = Hyperparameters {
            vocab_size: -1,
            ..Default::default()
        };
        assert_eq!(params.resolved_vocab_size(32000), 32000);
    }

    #[test]
    fn stored_vocab_wins_over_tokenizer() {
        let params = Hyperparameters::default();
        assert_eq!(params.resolved_vocab_size(32000), 128256);
    }

    #[test]
    fn uneven_heads_rejected() {
        let params = Hyperparameters {
            hidden_dim: 100,
            n_heads: 32,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::UnevenHeads { .. })
        ));
    }

    #[test]
    fn zero_layer_count_rejected() {
        let params = Hyperparameters {
            n_layers: 0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ConfigError::ZeroField { .. })));
    }
}
