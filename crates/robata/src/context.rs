//! Per-request generation state.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PromptError;
use crate::tokenizer::Tokenizer;

/// Monotone creation counter; the deterministic tie-break when several
/// requests join the scheduler in the same step.
static ARRIVALS: AtomicU64 = AtomicU64::new(0);

/// Mutable state of one generation request.
///
/// Created when a prompt is accepted (the single tokenizer encode),
/// mutated exactly once per step by the scheduler, and discarded once the
/// caller has consumed the terminal signal.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    prompt: String,
    tokens: Vec<u32>,
    next_input: Vec<u32>,
    max_tokens: usize,
    output: String,
    done: bool,
    arrival: u64,
}

impl GenerationContext {
    /// Accepts a prompt, encoding it once.
    ///
    /// `max_tokens` is capped at `min(prompt_len + max_new_tokens,
    /// max_length)`, or `max_length` when no explicit cap is given. Fails
    /// with [`PromptError::TooLong`] when the prompt leaves no room for
    /// generation under `max_length`.
    pub fn new(
        prompt: impl Into<String>,
        tokenizer: &dyn Tokenizer,
        max_new_tokens: Option<usize>,
        max_length: usize,
    ) -> Result<Self, PromptError> {
        let prompt = prompt.into();
        let encoded = tokenizer.encode(&prompt);
        if encoded.len() >= max_length {
            return Err(PromptError::TooLong {
                prompt_tokens: encoded.len(),
                limit: max_length,
            });
        }
        let max_tokens = match max_new_tokens {
            Some(requested) => usize::min(encoded.len() + requested, max_length),
            None => max_length,
        };
        Ok(Self {
            prompt,
            next_input: encoded.clone(),
            tokens: encoded,
            max_tokens,
            output: String::new(),
            done: false,
            arrival: ARRIVALS.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// The original input text.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// All token ids so far, prompt included.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// The token ids to feed on the next forward pass: the full prompt
    /// before the first step, the single most recent token afterwards.
    pub fn next_input(&self) -> &[u32] {
        &self.next_input
    }

    /// Absolute cap on the total token count.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Decoded text produced so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Whether a terminal signal has been emitted for this request.
    pub fn done(&self) -> bool {
        self.done
    }

    pub(crate) fn arrival(&self) -> u64 {
        self.arrival
    }

    /// Records one produced token. Called exactly once per step while the
    /// request is active.
    pub(crate) fn append(&mut self, token: u32, text: &str) {
        self.tokens.push(token);
        self.next_input = vec![token];
        self.output.push_str(text);
    }

    /// Terminal predicate, evaluated by the scheduler after [`append`].
    ///
    /// [`append`]: GenerationContext::append
    pub fn is_done(&self, eos_token_id: u32) -> bool {
        self.tokens.last() == Some(&eos_token_id) || self.tokens.len() >= self.max_tokens
    }

    pub(crate) fn mark_done(&mut self) {
        self.done = true;
    }

    /// Resets the next input to the full token history.
    ///
    /// Used when the shared cache base is reset: the cached prefix is gone,
    /// so the whole sequence must be recomputed on the next pass.
    pub(crate) fn rewind_to_full_history(&mut self) {
        self.next_input = self.tokens.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::VocabTokenizer;

    #[test]
    fn new_context_encodes_prompt_once() {
        let tokenizer = VocabTokenizer::default();
        let context = GenerationContext::new("abc", &tokenizer, Some(4), 64).unwrap();
        assert_eq!(context.tokens().len(), 3);
        assert_eq!(context.next_input(), context.tokens());
        assert_eq!(context.max_tokens(), 7);
        assert!(!context.done());
    }

    #[test]
    fn max_tokens_caps_at_limit() {
        let tokenizer = VocabTokenizer::default();
        let context = GenerationContext::new("abcde", &tokenizer, Some(100), 8).unwrap();
        assert_eq!(context.max_tokens(), 8);
    }

    #[test]
    fn missing_cap_runs_to_limit() {
        let tokenizer = VocabTokenizer::default();
        let context = GenerationContext::new("ab", &tokenizer, None, 32).unwrap();
        assert_eq!(context.max_tokens(), 32);
    }

    #[test]
    fn prompt_with_no_generation_room_is_rejected() {
        let tokenizer = VocabTokenizer::default();
        let err = GenerationContext::new("abcdefgh", &tokenizer, Some(4), 8).unwrap_err();
        assert!(matches!(err, PromptError::TooLong { prompt_tokens: 8, limit: 8 }));
    }

    #[test]
    fn append_advances_state() {
        let tokenizer = VocabTokenizer::default();
        let mut context = GenerationContext::new("ab", &tokenizer, Some(4), 64).unwrap();
        context.append(120, "x");
        assert_eq!(context.tokens().len(), 3);
        assert_eq!(context.next_input(), &[120]);
        assert_eq!(context.output(), "x");
    }

    #[test]
    fn done_on_eos_token() {
        let tokenizer = VocabTokenizer::default();
        let mut context = GenerationContext::new("ab", &tokenizer, Some(8), 64).unwrap();
        assert!(!context.is_done(tokenizer.eos_token_id()));
        context.append(tokenizer.eos_token_id(), "");
        assert!(context.is_done(tokenizer.eos_token_id()));
    }

    #[test]
    fn done_on_length_cap() {
        let tokenizer = VocabTokenizer::default();
        let mut context = GenerationContext::new("ab", &tokenizer, Some(1), 64).unwrap();
        context.append(120, "x");
        assert!(context.is_done(tokenizer.eos_token_id()));
    }

    #[test]
    fn rewind_restores_full_history() {
        let tokenizer = VocabTokenizer::default();
        let mut context = GenerationContext::new("ab", &tokenizer, Some(8), 64).unwrap();
        context.append(120, "x");
        assert_eq!(context.next_input().len(), 1);
        context.rewind_to_full_history();
        assert_eq!(context.next_input(), context.tokens());
    }

    #[test]
    fn arrivals_are_strictly_ordered() {
        let tokenizer = VocabTokenizer::default();
        let first = GenerationContext::new("ab", &tokenizer, None, 64).unwrap();
        let second = GenerationContext::new("cd", &tokenizer, None, 64).unwrap();
        assert!(first.arrival() < second.arrival());
    }
}
