//! Deterministic test doubles for engine logic.
//!
//! Everything here runs on plain host memory with no tensor runtime, so
//! scheduling and cache behavior can be tested deterministically and
//! cheaply: a data-carrying CPU tensor, a character-level tokenizer, and
//! an executor that emits a scripted token sequence.

mod cpu_tensor;
mod scripted_executor;
mod vocab_tokenizer;

pub use cpu_tensor::CpuTensor;
pub use scripted_executor::ScriptedExecutor;
pub use vocab_tokenizer::VocabTokenizer;

use crate::hyperparameters::Hyperparameters;

/// Hyperparameters small enough to step through by hand.
///
/// The vocabulary size is left as the sentinel so tests also exercise
/// tokenizer resolution.
pub fn tiny_params() -> Hyperparameters {
    Hyperparameters {
        seq_len: 32,
        n_layers: 2,
        n_heads: 2,
        n_kv_heads: 2,
        vocab_size: -1,
        hidden_dim: 8,
    }
}
