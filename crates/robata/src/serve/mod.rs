//! # Generation Server
//!
//! The asynchronous serving front end over the step scheduler.
//!
//! ## Overview
//!
//! [`GenerationServer`] accepts prompts and returns a [`TokenStream`] of
//! decoded fragments per request. A background tokio task owns the
//! [`Scheduler`] exclusively and drives it one step at a time: it drains
//! newly queued requests into the live request set, runs a step, routes
//! each outcome to its stream, and drops finished entries so their
//! streams close. Because one task owns the scheduler, the single-step
//! cooperative discipline of the core holds by construction: no two
//! steps ever interleave their cache mutations.
//!
//! Requests whose streams are dropped by the caller are treated as
//! cancelled: the worker stops submitting them and the next reconcile
//! releases their cache residency, exactly like normal completion.
//!
//! A failed step (executor failure or shape mismatch) is fatal for every
//! request in flight at that moment; their streams close and the error is
//! logged. Requests submitted afterwards are served normally.

mod pill;
mod queue_item;
mod token_stream;
mod worker;

pub use token_stream::TokenStream;

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{error, info};

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::context::GenerationContext;
use crate::error::{ConfigError, PromptError};
use crate::executor::ModelExecutor;
use crate::hyperparameters::Hyperparameters;
use crate::scheduler::{RequestId, Scheduler, StepOutcome};
use crate::tokenizer::Tokenizer;

use pill::Pill;
use queue_item::QueueItem;
use worker::WorkerHandle;

/// Streaming generation front end.
pub struct GenerationServer<T: Tokenizer> {
    waiting: Arc<Mutex<Vec<QueueItem>>>,
    tokenizer: Arc<T>,
    config: EngineConfig,
    handle: WorkerHandle,
}

impl<T: Tokenizer> GenerationServer<T> {
    /// Builds the scheduler and spawns the background worker.
    ///
    /// Fails fast on any disagreement between hyperparameters,
    /// configuration, and the executor contract.
    pub fn new<B, E>(
        executor: E,
        tokenizer: T,
        params: Hyperparameters,
        config: EngineConfig,
        device: B::Device,
    ) -> Result<Self, ConfigError>
    where
        B: Backend,
        E: ModelExecutor<B> + 'static,
    {
        let tokenizer = Arc::new(tokenizer);
        let scheduler = Scheduler::new(
            executor,
            tokenizer.clone(),
            params,
            config.clone(),
            device,
        )?;
        let waiting: Arc<Mutex<Vec<QueueItem>>> = Arc::new(Mutex::new(Vec::new()));

        let pill = Pill::new();
        let handle = WorkerHandle::new({
            let waiting = waiting.clone();
            let tokenizer = tokenizer.clone();
            move |running, notifier| {
                tokio::spawn(async move {
                    let _pill = pill;
                    serve_loop(scheduler, tokenizer, running, notifier, waiting).await;
                })
            }
        });
        info!("generation server started");

        Ok(Self {
            waiting,
            tokenizer,
            config,
            handle,
        })
    }

    /// Accepts a prompt and returns its fragment stream.
    ///
    /// The prompt is encoded here, once; a prompt leaving no room for
    /// generation is rejected before it ever reaches the scheduler. The
    /// returned stream yields fragments as steps produce them and ends on
    /// termination.
    pub async fn generate(
        &self,
        prompt: &str,
        max_new_tokens: Option<usize>,
    ) -> Result<TokenStream, PromptError> {
        let cap = max_new_tokens.or(self.config.max_new_tokens);
        let context =
            GenerationContext::new(prompt, self.tokenizer.as_ref(), cap, self.config.max_length)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let item = QueueItem::new(context, tx);
        {
            let mut queue = self.waiting.lock().await;
            queue.push(item);
        }
        self.handle.notify();
        Ok(TokenStream::new(rx))
    }
}

async fn serve_loop<B, E, T>(
    mut scheduler: Scheduler<B, E, Arc<T>>,
    tokenizer: Arc<T>,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
    waiting: Arc<Mutex<Vec<QueueItem>>>,
) where
    B: Backend,
    E: ModelExecutor<B>,
    T: Tokenizer,
{
    let mut live: HashMap<RequestId, GenerationContext> = HashMap::new();
    let mut senders: HashMap<RequestId, mpsc::UnboundedSender<String>> = HashMap::new();

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        if live.is_empty() && waiting.lock().await.is_empty() {
            // No work; wait for a notification or re-check shortly.
            let _ = tokio::time::timeout(Duration::from_millis(100), notifier.notified()).await;
            continue;
        }

        {
            let mut queue = waiting.lock().await;
            for item in queue.drain(..) {
                let (id, context, sender) = item.into_parts();
                live.insert(id.clone(), context);
                senders.insert(id, sender);
            }
        }

        // A dropped receiver is a cancellation: stop submitting the id and
        // let the next reconcile release its residency.
        senders.retain(|id, sender| {
            if sender.is_closed() {
                live.remove(id);
                false
            } else {
                true
            }
        });

        if live.is_empty() {
            continue;
        }

        match scheduler.step(&mut live).await {
            Ok(outcomes) => {
                for (id, outcome) in outcomes {
                    match outcome {
                        StepOutcome::Token(text) => {
                            if let Some(sender) = senders.get(&id) {
                                let _ = sender.send(text);
                            }
                        }
                        StepOutcome::Finished => {
                            // The terminal step still produced one token;
                            // flush its fragment (empty for end-of-sequence)
                            // before the dropped sender ends the stream.
                            if let Some(context) = live.remove(&id) {
                                if let (Some(&last), Some(sender)) =
                                    (context.tokens().last(), senders.get(&id))
                                {
                                    let text = tokenizer.decode(&[last]);
                                    if !text.is_empty() {
                                        let _ = sender.send(text);
                                    }
                                }
                            }
                            senders.remove(&id);
                        }
                        StepOutcome::Deferred => {}
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "generation step failed; aborting in-flight requests");
                live.clear();
                senders.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExecutor, VocabTokenizer, tiny_params};
    use futures::StreamExt;

    const VOCAB: usize = 512;

    fn server(script: Vec<Vec<u32>>, config: EngineConfig) -> GenerationServer<VocabTokenizer> {
        let executor = ScriptedExecutor::new(&tiny_params(), VOCAB, script);
        GenerationServer::new(executor, VocabTokenizer::default(), tiny_params(), config, ())
            .unwrap()
    }

    #[tokio::test]
    async fn streams_fragments_to_completion() {
        // 'h', 'i', then eos.
        let server = server(
            vec![vec![104], vec![105], vec![2]],
            EngineConfig::default(),
        );
        let stream = server.generate("abc", Some(8)).await.unwrap();
        let fragments: Vec<String> = stream.collect().await;
        assert_eq!(fragments.concat(), "hi");
    }

    #[tokio::test]
    async fn serves_concurrent_requests() {
        // Every row always produces 'h'; both requests cap after two
        // tokens.
        let server = server(vec![vec![104]; 16], EngineConfig::default());
        let first = server.generate("ab", Some(2)).await.unwrap();
        let second = server.generate("wxyz", Some(2)).await.unwrap();

        let (first, second): (Vec<String>, Vec<String>) =
            tokio::join!(first.collect(), second.collect());
        assert_eq!(first.concat(), "hh");
        assert_eq!(second.concat(), "hh");
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected_at_intake() {
        let server = server(vec![], EngineConfig::default());
        let err = server.generate(&"a".repeat(600), None).await.unwrap_err();
        assert!(matches!(err, PromptError::TooLong { .. }));
    }

    #[tokio::test]
    async fn capacity_one_serves_requests_back_to_back() {
        let config = EngineConfig {
            max_cache_batch_size: 1,
            ..Default::default()
        };
        let server = server(vec![vec![104]; 16], config);
        let first = server.generate("ab", Some(2)).await.unwrap();
        let second = server.generate("cd", Some(2)).await.unwrap();

        // The second request is deferred until the first completes, then
        // runs to completion on the freed slot.
        let (first, second): (Vec<String>, Vec<String>) =
            tokio::join!(first.collect(), second.collect());
        assert_eq!(first.concat(), "hh");
        assert_eq!(second.concat(), "hh");
    }

    #[tokio::test]
    async fn step_failure_closes_streams_without_killing_the_server() {
        let executor = Arc::new(ScriptedExecutor::new(
            &tiny_params(),
            VOCAB,
            vec![vec![104]; 16],
        ));
        let server = GenerationServer::new(
            executor.clone(),
            VocabTokenizer::default(),
            tiny_params(),
            EngineConfig::default(),
            (),
        )
        .unwrap();

        // The first step fails; the in-flight request's stream ends with
        // nothing delivered.
        executor.fail_next();
        let stream = server.generate("ab", Some(4)).await.unwrap();
        let fragments: Vec<String> = stream.collect().await;
        assert!(fragments.is_empty());

        // The server keeps serving subsequent requests.
        let stream = server.generate("cd", Some(2)).await.unwrap();
        let fragments: Vec<String> = stream.collect().await;
        assert_eq!(fragments.concat(), "hh");
    }
}
