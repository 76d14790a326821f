/// # Constants with reserved meanings in Robata

/// In a token batch, robata reserves the `0th` dimension for batching
pub const BATCH_DIM: usize = 0;

/// In a token batch, robata reserves the `1st` dimension for sequence
pub const SEQ_DIM: usize = 1;

/// In a key/value cache tensor, the `0th` dimension indexes layers
pub const KV_LAYER_DIM: usize = 0;

/// In a key/value cache tensor, the `1st` dimension indexes the batch
pub const KV_BATCH_DIM: usize = 1;

/// In a key/value cache tensor, the `2nd` dimension indexes the sequence
pub const KV_SEQ_DIM: usize = 2;
