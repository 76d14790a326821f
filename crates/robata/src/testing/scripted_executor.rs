use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::ExecutorError;
use crate::executor::{ModelExecutor, StepInputs, StepOutputs, TensorContract};
use crate::hyperparameters::Hyperparameters;

use super::CpuTensor;

/// An executor that "predicts" a scripted token sequence.
///
/// Each forward pass pops one script entry holding the token to emit per
/// batch row (the last entry covers surplus rows), and returns one-hot
/// logits at every position so greedy selection lands on the scripted
/// token regardless of padding direction. Key/value deltas are filled
/// with the 1-based call number, making it visible in tests which forward
/// pass produced which cache contents.
pub struct ScriptedExecutor {
    contract: TensorContract,
    script: Mutex<VecDeque<Vec<u32>>>,
    calls: Mutex<Vec<StepInputs<CpuTensor>>>,
    forwards: AtomicUsize,
    fail_next: AtomicBool,
    corrupt_next: AtomicBool,
}

impl ScriptedExecutor {
    pub fn new(params: &Hyperparameters, vocab_size: usize, script: Vec<Vec<u32>>) -> Self {
        Self {
            contract: TensorContract::for_model(params, vocab_size),
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            forwards: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            corrupt_next: AtomicBool::new(false),
        }
    }

    /// Declare a fixed batch size in the contract.
    pub fn with_fixed_batch(mut self, batch_size: usize) -> Self {
        self.contract.fixed_batch_size = Some(batch_size);
        self
    }

    /// Make the next forward pass fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next forward pass return logits of the wrong shape.
    pub fn corrupt_next_shapes(&self) {
        self.corrupt_next.store(true, Ordering::SeqCst);
    }

    /// Inputs received so far, in call order.
    pub fn calls(&self) -> Vec<StepInputs<CpuTensor>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn forward_count(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelExecutor<CpuTensor> for ScriptedExecutor {
    fn contract(&self) -> TensorContract {
        self.contract
    }

    async fn forward(
        &self,
        inputs: StepInputs<CpuTensor>,
    ) -> Result<StepOutputs<CpuTensor>, ExecutorError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ExecutorError::msg("scripted failure"));
        }

        let dims = inputs.tokens.shape();
        let (batch, width) = (dims[0], dims[1]);
        let call = self.forwards.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(inputs.clone());

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![1]);

        let vocab = if self.corrupt_next.swap(false, Ordering::SeqCst) {
            self.contract.vocab_size + 1
        } else {
            self.contract.vocab_size
        };
        let mut logits = vec![0.0f32; batch * width * vocab];
        for row in 0..batch {
            let token = step.get(row).or(step.last()).copied().unwrap_or(1);
            for pos in 0..width {
                logits[(row * width + pos) * vocab + token as usize] = 1.0;
            }
        }
        let logits = CpuTensor::new(vec![batch, width, vocab], logits);

        let kv_shape = vec![
            self.contract.n_layers,
            batch,
            width,
            self.contract.n_kv_heads,
            self.contract.head_dim,
        ];
        let keys = CpuTensor::filled(kv_shape.clone(), call as f32);
        let values = CpuTensor::filled(kv_shape, call as f32);
        Ok(StepOutputs {
            logits,
            keys,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tiny_params;

    fn inputs(batch: usize, width: usize) -> StepInputs<CpuTensor> {
        StepInputs {
            tokens: CpuTensor::zeros(&[batch, width], &()),
            mask: CpuTensor::zeros(&[batch, width], &()),
            keys: CpuTensor::zeros(&[2, batch, 0, 2, 4], &()),
            values: CpuTensor::zeros(&[2, batch, 0, 2, 4], &()),
        }
    }

    #[tokio::test]
    async fn emits_scripted_tokens_per_row() {
        let executor = ScriptedExecutor::new(&tiny_params(), 16, vec![vec![7, 9]]);
        let outputs = executor.forward(inputs(2, 3)).await.unwrap();
        assert_eq!(outputs.logits.shape(), vec![2, 3, 16]);

        let rows = outputs.logits.vectorize_dim(0);
        assert_eq!(rows[0].slice(0, 2, 1).argmax(1).to_u32_vec(), vec![7]);
        assert_eq!(rows[1].slice(0, 0, 1).argmax(1).to_u32_vec(), vec![9]);
    }

    #[tokio::test]
    async fn kv_deltas_carry_the_call_number() {
        let executor = ScriptedExecutor::new(&tiny_params(), 16, vec![vec![1], vec![1]]);
        let first = executor.forward(inputs(1, 4)).await.unwrap();
        let second = executor.forward(inputs(1, 1)).await.unwrap();
        assert!(first.keys.data().iter().all(|&v| v == 1.0));
        assert!(second.keys.data().iter().all(|&v| v == 2.0));
        assert_eq!(second.keys.shape(), vec![2, 1, 1, 2, 4]);
    }

    #[tokio::test]
    async fn scripted_failure_propagates() {
        let executor = ScriptedExecutor::new(&tiny_params(), 16, vec![]);
        executor.fail_next();
        assert!(executor.forward(inputs(1, 1)).await.is_err());
        // The failure is one-shot.
        assert!(executor.forward(inputs(1, 1)).await.is_ok());
    }
}
