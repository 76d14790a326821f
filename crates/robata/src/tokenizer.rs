use std::sync::Arc;

/// The tokenizer boundary.
///
/// Tokenization is an external collaborator of the scheduling core; only
/// this seam is specified here. Contexts encode once at creation and the
/// scheduler decodes one produced token per request per step.
pub trait Tokenizer: Send + Sync + 'static {
    /// Encode text into token ids.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids into a text fragment.
    fn decode(&self, ids: &[u32]) -> String;

    /// Number of tokens in the vocabulary.
    fn vocab_size(&self) -> usize;

    /// Token id that terminates generation.
    fn eos_token_id(&self) -> u32;
}

impl<T: Tokenizer + ?Sized> Tokenizer for Arc<T> {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.as_ref().encode(text)
    }

    fn decode(&self, ids: &[u32]) -> String {
        self.as_ref().decode(ids)
    }

    fn vocab_size(&self) -> usize {
        self.as_ref().vocab_size()
    }

    fn eos_token_id(&self) -> u32 {
        self.as_ref().eos_token_id()
    }
}
