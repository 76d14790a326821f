//! The model executor boundary.
//!
//! All numeric math lives behind [`ModelExecutor`]: one batched forward
//! pass in, logits plus key/value deltas out. The scheduler treats the
//! call as blocking and non-reentrant; its await point is the only place a
//! step may suspend, and no cache mutation happens while it is
//! outstanding.

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::{ConfigError, ExecutorError};
use crate::hyperparameters::Hyperparameters;

/// One step's worth of executor inputs.
///
/// Shapes, with `b` the batch size, `w` the padded input width, and `c`
/// the cached sequence length:
/// - `tokens`: `[b, w]` token ids
/// - `mask`: `[b, c + w]` boolean validity, `false` exactly at padding
///   positions and positions beyond a row's true length
/// - `keys` / `values`: `[n_layers, b, c, n_kv_heads, head_dim]`
#[derive(Debug, Clone)]
pub struct StepInputs<B> {
    pub tokens: B,
    pub mask: B,
    pub keys: B,
    pub values: B,
}

/// One step's worth of executor outputs.
///
/// - `logits`: `[b, w, vocab]`
/// - `keys` / `values`: freshly computed slices only,
///   `[n_layers, b, w, n_kv_heads, head_dim]`
#[derive(Debug, Clone)]
pub struct StepOutputs<B> {
    pub logits: B,
    pub keys: B,
    pub values: B,
}

/// Statically declared tensor expectations of an executor.
///
/// Checked against the model [`Hyperparameters`] once, at engine
/// construction; any disagreement is a fatal configuration error and no
/// step ever runs.
#[derive(Debug, Clone, Copy)]
pub struct TensorContract {
    pub n_layers: usize,
    pub n_kv_heads: usize,
    pub head_dim: usize,
    pub vocab_size: usize,
    /// Executors compiled for a fixed batch (single-sequence graphs)
    /// declare it here; a step batch of any other size is fatal.
    pub fixed_batch_size: Option<usize>,
}

impl TensorContract {
    /// The contract a well-matched executor would declare for `params`.
    pub fn for_model(params: &Hyperparameters, vocab_size: usize) -> Self {
        Self {
            n_layers: params.n_layers,
            n_kv_heads: params.n_kv_heads,
            head_dim: params.head_dim(),
            vocab_size,
            fixed_batch_size: None,
        }
    }

    pub(crate) fn check_against(
        &self,
        params: &Hyperparameters,
        vocab_size: usize,
    ) -> Result<(), ConfigError> {
        for (field, model, executor) in [
            ("n_layers", params.n_layers, self.n_layers),
            ("n_kv_heads", params.n_kv_heads, self.n_kv_heads),
            ("head_dim", params.head_dim(), self.head_dim),
            ("vocab_size", vocab_size, self.vocab_size),
        ] {
            if model != executor {
                return Err(ConfigError::ContractMismatch {
                    field,
                    model,
                    executor,
                });
            }
        }
        Ok(())
    }
}

/// A stateless batched forward pass.
#[async_trait]
pub trait ModelExecutor<B: Backend>: Send + Sync {
    /// Tensor expectations of this executor.
    fn contract(&self) -> TensorContract;

    /// Run one forward pass over the packed batch.
    ///
    /// Failures are propagated unmodified to the step caller for the
    /// entire in-flight batch; there is no partial-batch recovery.
    async fn forward(&self, inputs: StepInputs<B>) -> Result<StepOutputs<B>, ExecutorError>;
}

#[async_trait]
impl<B, E> ModelExecutor<B> for std::sync::Arc<E>
where
    B: Backend,
    E: ModelExecutor<B>,
{
    fn contract(&self) -> TensorContract {
        self.as_ref().contract()
    }

    async fn forward(&self, inputs: StepInputs<B>) -> Result<StepOutputs<B>, ExecutorError> {
        self.as_ref().forward(inputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_contract_passes() {
        let params = Hyperparameters::default();
        let contract = TensorContract::for_model(&params, 128256);
        assert!(contract.check_against(&params, 128256).is_ok());
    }

    #[test]
    fn layer_disagreement_is_fatal() {
        let params = Hyperparameters::default();
        let mut contract = TensorContract::for_model(&params, 128256);
        contract.n_layers = 16;
        assert!(matches!(
            contract.check_against(&params, 128256),
            Err(ConfigError::ContractMismatch {
                field: "n_layers",
                ..
            })
        ));
    }

    #[test]
    fn vocab_disagreement_is_fatal() {
        let params = Hyperparameters::default();
        let contract = TensorContract::for_model(&params, 1000);
        assert!(matches!(
            contract.check_against(&params, 128256),
            Err(ConfigError::ContractMismatch {
                field: "vocab_size",
                ..
            })
        ));
    }
}
