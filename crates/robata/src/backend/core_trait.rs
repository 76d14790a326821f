use std::fmt::Debug;

/// The backend trait that must be fulfilled by any tensor implementation
/// to support scheduling and cache bookkeeping.
///
/// The scheduling core only ever manipulates tensors through this surface:
/// construction from token ids and mask rows, concatenation, slicing, and
/// extraction of integer results. Everything numeric beyond that belongs
/// to the model executor.
pub trait Backend: Debug + Clone + Send + Sync + 'static {
    /// Placement context for newly constructed tensors
    type Device: Clone + Send + Sync + 'static;

    /// Return the shape of this tensor
    fn shape(&self) -> Vec<usize>;

    /// Return the device this tensor lives on
    fn device(&self) -> Self::Device;

    /// Build a rank-1 integer tensor from token ids
    fn token_ids(ids: &[u32], device: &Self::Device) -> Self;

    /// Build a rank-2 boolean mask from per-row validity flags.
    /// All rows must have equal length.
    fn mask(rows: &[Vec<bool>], device: &Self::Device) -> Self;

    /// Build a zero-filled tensor of the given shape
    fn zeros(shape: &[usize], device: &Self::Device) -> Self;

    /// Concatenate several tensors along dimension `dim`, in the order supplied
    fn cat(tensors: &[Self], dim: usize) -> Self;

    /// Insert a new dimension of size 1 at `dim`
    fn unsqueeze(&self, dim: usize) -> Self;

    /// Slice a given `dim` from `start` to `start + len`
    fn slice(&self, dim: usize, start: usize, len: usize) -> Self;

    /// Split along `dim` into one tensor per index, with `dim` squeezed away
    fn vectorize_dim(&self, dim: usize) -> Vec<Self>;

    /// Indices of the maximum value along `dim`, with `dim` reduced away
    fn argmax(&self, dim: usize) -> Self;

    /// Flatten and read back as unsigned integers
    fn to_u32_vec(&self) -> Vec<u32>;
}
