use thiserror::Error;

/// Raised at context creation when a prompt cannot be served at all.
///
/// A request that fails here never enters the scheduler.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error(
        "prompt of {prompt_tokens} tokens leaves no room for generation \
         under sequence length limit {limit}"
    )]
    TooLong { prompt_tokens: usize, limit: usize },
}

/// Transient cache admission failure.
///
/// Never surfaced to callers as a hard error; the scheduler resolves it by
/// deferring the request until a resident request completes.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache pool is full: all {capacity} slots are bound")]
    Full { capacity: usize },
}

/// Fatal disagreement between hyperparameters, configuration, and the
/// executor tensor contract. Raised once, never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("hidden dimension {hidden_dim} is not divisible by head count {n_heads}")]
    UnevenHeads { hidden_dim: usize, n_heads: usize },

    #[error("head count {n_heads} is not divisible by key/value head count {n_kv_heads}")]
    UnevenKvHeads { n_heads: usize, n_kv_heads: usize },

    #[error("{field} must be nonzero")]
    ZeroField { field: &'static str },

    #[error("executor contract disagrees on {field}: model has {model}, executor expects {executor}")]
    ContractMismatch {
        field: &'static str,
        model: usize,
        executor: usize,
    },

    #[error("executor is fixed to batch size {expected} but the step batch has {actual} requests")]
    FixedBatchSize { expected: usize, actual: usize },
}

/// Opaque failure from the forward-pass call, propagated unmodified to the
/// step caller for the entire in-flight batch.
#[derive(Error, Debug)]
#[error("executor failure: {0}")]
pub struct ExecutorError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl ExecutorError {
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(source.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }
}

/// Everything a single scheduler step can fail with.
///
/// Recoverable conditions (a full cache) are resolved internally by
/// deferral and never appear here.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("executor returned {tensor} with shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_error_display() {
        let e = PromptError::TooLong {
            prompt_tokens: 600,
            limit: 512,
        };
        assert_eq!(
            e.to_string(),
            "prompt of 600 tokens leaves no room for generation under sequence length limit 512"
        );
    }

    #[test]
    fn cache_error_display() {
        let e = CacheError::Full { capacity: 4 };
        assert_eq!(e.to_string(), "cache pool is full: all 4 slots are bound");
    }

    #[test]
    fn step_error_wraps_executor_failure() {
        let e: StepError = ExecutorError::msg("device lost").into();
        assert_eq!(e.to_string(), "executor failure: device lost");
    }
}
