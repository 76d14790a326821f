//! # Step Scheduler
//!
//! The orchestration core. Owns the active request set and, once per
//! generation step: reconciles the caller-supplied request set against the
//! previous cohort, packs padded batches, builds the attention mask,
//! invokes the model executor, demultiplexes logits back to contexts, and
//! reclaims cache residency.
//!
//! ## Per-request lifecycle
//!
//! ```text
//! Pending -> Active -> Done -> removed
//! ```
//!
//! `Pending` requests have been seen but not yet admitted to the cache (the
//! pool was full); they are deferred, never dropped, and admitted in
//! arrival order as residents complete. `Done` requests await one further
//! step in which the caller excludes them, at which point their slot is
//! released.
//!
//! ## Concurrency
//!
//! A step is single-threaded-cooperative: the full
//! reconcile-pack-execute-unpack sequence runs to completion before the
//! next step begins, and the only suspension point is the executor's
//! forward await. Cancelling a request is nothing special: the caller
//! omits its id from the next step and reconciliation releases it exactly
//! like normal completion.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::cache::KvCacheStore;
use crate::config::EngineConfig;
use crate::context::GenerationContext;
use crate::error::{CacheError, ConfigError, StepError};
use crate::executor::{ModelExecutor, StepInputs, TensorContract};
use crate::hyperparameters::Hyperparameters;
use crate::tensor::operations::{
    greedy_token, pack_rows, pad_row, split_logit_rows, step_position,
};
use crate::tokenizer::Tokenizer;

/// Opaque request identifier chosen by the caller.
pub type RequestId = String;

/// Lifecycle state of one request id inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Accepted but not yet admitted to the cache.
    Pending,
    /// Cache-resident and receiving steps.
    Active,
    /// Terminal; awaiting exclusion from the next step's request set.
    Done,
}

/// What one step produced for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A freshly decoded token fragment; keep streaming.
    Token(String),
    /// Terminal signal; stop streaming this id and exclude it from the
    /// next step's request set.
    Finished,
    /// Excluded from this step because the cache pool was full; resubmit.
    Deferred,
}

struct Session {
    state: RequestState,
    /// Validity of the positions this request already has in the cache;
    /// `false` entries are pad positions the mask must keep excluding.
    cached_validity: Vec<bool>,
}

/// The per-step scheduler and cache lifecycle manager.
pub struct Scheduler<B, E, T>
where
    B: Backend,
    E: ModelExecutor<B>,
    T: Tokenizer,
{
    executor: E,
    tokenizer: T,
    params: Hyperparameters,
    config: EngineConfig,
    contract: TensorContract,
    cache: KvCacheStore<B>,
    device: B::Device,
    eos: u32,
    vocab: usize,
    sessions: HashMap<RequestId, Session>,
    active_order: Vec<RequestId>,
}

impl<B, E, T> Scheduler<B, E, T>
where
    B: Backend,
    E: ModelExecutor<B>,
    T: Tokenizer,
{
    /// Builds a scheduler, verifying hyperparameters, configuration, and
    /// the executor tensor contract against each other. Any disagreement
    /// is fatal here; no step ever runs.
    pub fn new(
        executor: E,
        tokenizer: T,
        params: Hyperparameters,
        config: EngineConfig,
        device: B::Device,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        config.validate()?;
        let vocab = params.resolved_vocab_size(tokenizer.vocab_size());
        let contract = executor.contract();
        contract.check_against(&params, vocab)?;
        let cache = KvCacheStore::new(
            config.resolved_strategy(),
            &params,
            config.max_cache_batch_size,
            device.clone(),
        );
        let eos = tokenizer.eos_token_id();
        Ok(Self {
            executor,
            tokenizer,
            params,
            config,
            contract,
            cache,
            device,
            eos,
            vocab,
            sessions: HashMap::new(),
            active_order: Vec::new(),
        })
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn cache(&self) -> &KvCacheStore<B> {
        &self.cache
    }

    /// Lifecycle state of a request id, if the scheduler knows it.
    pub fn state(&self, id: &str) -> Option<RequestState> {
        self.sessions.get(id).map(|s| s.state)
    }

    /// Number of cache-resident requests.
    pub fn active(&self) -> usize {
        self.active_order.len()
    }

    /// Advances every request in `batch` by one generation step.
    ///
    /// Returns one observable outcome per request that was asked to
    /// advance: a decoded fragment, a terminal signal, or a deferral.
    /// Requests already marked done produce no outcome and are reconciled
    /// out without being advanced again.
    pub async fn step(
        &mut self,
        batch: &mut HashMap<RequestId, GenerationContext>,
    ) -> Result<HashMap<RequestId, StepOutcome>, StepError> {
        let mut outcomes: HashMap<RequestId, StepOutcome> = HashMap::new();

        // Reconcile: leavers first. An id leaves when the caller dropped it
        // or when it finished last step.
        let mut leaving: Vec<RequestId> = Vec::new();
        for id in &self.active_order {
            let finished = self
                .sessions
                .get(id)
                .is_some_and(|s| s.state == RequestState::Done);
            if finished || !batch.contains_key(id) {
                leaving.push(id.clone());
            }
        }
        for id in &leaving {
            self.cache.release(id);
            self.sessions.remove(id);
            debug!(request = %id, "released cache residency");
        }
        self.active_order.retain(|id| !leaving.contains(id));
        // Pending entries hold no cache state; forget the ones the caller
        // stopped asking about.
        self.sessions.retain(|id, _| batch.contains_key(id));

        let mut churn = !leaving.is_empty();

        // Joiners, oldest first.
        let mut joiners: Vec<RequestId> = batch
            .iter()
            .filter(|(id, context)| {
                !context.done()
                    && self
                        .sessions
                        .get(id.as_str())
                        .is_none_or(|s| s.state == RequestState::Pending)
            })
            .map(|(id, _)| id.clone())
            .collect();
        joiners.sort_by_key(|id| batch[id].arrival());

        for id in joiners {
            match self.cache.admit(&id) {
                Ok(()) => {
                    debug!(request = %id, "admitted to cache");
                    self.sessions.insert(
                        id.clone(),
                        Session {
                            state: RequestState::Active,
                            cached_validity: Vec::new(),
                        },
                    );
                    self.active_order.push(id);
                    churn = true;
                }
                Err(CacheError::Full { capacity }) => {
                    debug!(request = %id, capacity, "cache full, deferring admission");
                    self.sessions.insert(
                        id.clone(),
                        Session {
                            state: RequestState::Pending,
                            cached_validity: Vec::new(),
                        },
                    );
                    outcomes.insert(id, StepOutcome::Deferred);
                }
            }
        }

        if churn {
            // Membership changed, which invalidates the shared position
            // base: every cached prefix is gone and the surviving cohort
            // recomputes from its full history.
            debug!(cohort = self.active_order.len(), "membership churn, resetting cache base");
            self.cache.reset();
            for id in &self.active_order {
                if let Some(context) = batch.get_mut(id) {
                    context.rewind_to_full_history();
                }
                if let Some(session) = self.sessions.get_mut(id) {
                    session.cached_validity.clear();
                }
            }
        }

        if self.active_order.is_empty() {
            return Ok(outcomes);
        }

        if let Some(expected) = self.contract.fixed_batch_size {
            if self.active_order.len() != expected {
                return Err(ConfigError::FixedBatchSize {
                    expected,
                    actual: self.active_order.len(),
                }
                .into());
            }
        }

        // Pack next inputs to a common width.
        let inputs: Vec<Vec<u32>> = self
            .active_order
            .iter()
            .map(|id| batch[id].next_input().to_vec())
            .collect();
        let width = inputs.iter().map(Vec::len).max().unwrap_or(0);
        trace!(
            batch = self.active_order.len(),
            width,
            cached = self.cache.sequence_length(),
            "packing step batch"
        );
        let mut rows = Vec::with_capacity(inputs.len());
        let mut fresh_validity = Vec::with_capacity(inputs.len());
        let mut real_lens = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let (ids, valid) = pad_row(input, width, self.config.pad_token_id, self.config.padding);
            rows.push(ids);
            fresh_validity.push(valid);
            real_lens.push(input.len());
        }
        let tokens = pack_rows::<B>(&rows, &self.device);

        // Mask over cached positions plus the fresh segment.
        let mask_rows: Vec<Vec<bool>> = self
            .active_order
            .iter()
            .zip(&fresh_validity)
            .map(|(id, fresh)| {
                let mut row = self.sessions[id].cached_validity.clone();
                row.extend(fresh);
                row
            })
            .collect();
        let mask = B::mask(&mask_rows, &self.device);

        // Execute. The forward await is the only suspension point of the
        // step; no cache mutation happens while it is outstanding.
        let (keys, values) = self.cache.view(&self.active_order);
        let outputs = self
            .executor
            .forward(StepInputs {
                tokens,
                mask,
                keys,
                values,
            })
            .await?;

        let batch_size = self.active_order.len();
        let expected_logits = vec![batch_size, width, self.vocab];
        if outputs.logits.shape() != expected_logits {
            return Err(StepError::ShapeMismatch {
                tensor: "logits",
                expected: expected_logits,
                actual: outputs.logits.shape(),
            });
        }
        let expected_kv = vec![
            self.params.n_layers,
            batch_size,
            width,
            self.params.n_kv_heads,
            self.params.head_dim(),
        ];
        for (name, tensor) in [("keys", &outputs.keys), ("values", &outputs.values)] {
            if tensor.shape() != expected_kv {
                return Err(StepError::ShapeMismatch {
                    tensor: name,
                    expected: expected_kv.clone(),
                    actual: tensor.shape(),
                });
            }
        }

        // Unpack: grow the cache, then select one token per request in
        // pack order.
        self.cache
            .update(outputs.keys, outputs.values, &self.active_order);
        for (id, fresh) in self.active_order.iter().zip(&fresh_validity) {
            if let Some(session) = self.sessions.get_mut(id) {
                session.cached_validity.extend(fresh);
            }
        }

        let logit_rows = split_logit_rows(&outputs.logits);
        for (i, id) in self.active_order.iter().enumerate() {
            let position = step_position(self.config.padding, width, real_lens[i]);
            let token = greedy_token(&logit_rows[i], position);
            let text = self.tokenizer.decode(&[token]);
            let context = batch
                .get_mut(id)
                .expect("active request present in step batch");
            context.append(token, &text);

            if context.is_done(self.eos) {
                context.mark_done();
                if let Some(session) = self.sessions.get_mut(id) {
                    session.state = RequestState::Done;
                }
                outcomes.insert(id.clone(), StepOutcome::Finished);
            } else {
                outcomes.insert(id.clone(), StepOutcome::Token(text));
            }
        }

        Ok(outcomes)
    }
}
