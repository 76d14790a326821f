use crate::tokenizer::Tokenizer;

/// Character-level tokenizer: every char encodes to its scalar value.
///
/// Encode/decode round-trips exactly, so one prompt character is one
/// token and sequence lengths can be controlled to the digit in tests.
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    vocab_size: usize,
    eos: u32,
}

impl VocabTokenizer {
    pub fn new(vocab_size: usize, eos: u32) -> Self {
        Self { vocab_size, eos }
    }
}

impl Default for VocabTokenizer {
    fn default() -> Self {
        Self::new(512, 2)
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(|c| c as u32).collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| {
                if id == self.eos {
                    String::new()
                } else {
                    char::from_u32(id).map(String::from).unwrap_or_default()
                }
            })
            .collect()
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> u32 {
        self.eos
    }
}
