//! # Key/Value Cache Store
//!
//! Owns the physical KV cache storage for one engine instance and exposes
//! strategy-specific allocation, view, update, and release operations.
//!
//! ## Strategies
//!
//! The store is constructed from a resolved [`CacheStrategy`] and holds
//! exactly one of two representations:
//!
//! - **Naive** - a single monolithic buffer covering the whole cohort,
//!   regrown from scratch whenever membership changes. Admission always
//!   succeeds. Required for quantized weight encodings.
//! - **Slot pool** (contiguous and continuous strategies) - a fixed pool
//!   of slots, one bound per resident request for its lifetime. Admission
//!   fails with [`CacheError::Full`] when the pool is saturated.
//!
//! The strategy is selected once; no caller branches on it per call.
//!
//! ## The shared position base
//!
//! `sequence_length` counts the tokens already incorporated for the
//! current cohort and is shared across all resident requests. It is reset
//! to zero whenever cohort membership changes, which invalidates every
//! cached prefix; the scheduler compensates by re-feeding full token
//! histories. A per-slot position counter would lift this limitation but
//! is not part of the current design.

mod naive;
mod slots;

use naive::NaiveCache;
use slots::SlotPool;

use crate::backend::Backend;
use crate::config::CacheStrategy;
use crate::error::CacheError;
use crate::hyperparameters::Hyperparameters;
use crate::tensor::constant::KV_SEQ_DIM;

/// Per-layer geometry of the cache tensors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheShape {
    pub n_layers: usize,
    pub n_kv_heads: usize,
    pub head_dim: usize,
}

enum StoreState<B: Backend> {
    Naive(NaiveCache<B>),
    Slots(SlotPool<B>),
}

/// Strategy-aware owner of the key/value cache buffers.
pub struct KvCacheStore<B: Backend> {
    strategy: CacheStrategy,
    state: StoreState<B>,
    shape: CacheShape,
    device: B::Device,
    sequence_length: usize,
}

impl<B: Backend> KvCacheStore<B> {
    pub fn new(
        strategy: CacheStrategy,
        params: &Hyperparameters,
        capacity: usize,
        device: B::Device,
    ) -> Self {
        let state = if strategy.is_slot_based() {
            StoreState::Slots(SlotPool::new(capacity))
        } else {
            StoreState::Naive(NaiveCache::new())
        };
        Self {
            strategy,
            state,
            shape: CacheShape {
                n_layers: params.n_layers,
                n_kv_heads: params.n_kv_heads,
                head_dim: params.head_dim(),
            },
            device,
            sequence_length: 0,
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Slot capacity, or `None` for the monolithic strategy.
    pub fn capacity(&self) -> Option<usize> {
        match &self.state {
            StoreState::Naive(_) => None,
            StoreState::Slots(pool) => Some(pool.capacity()),
        }
    }

    /// Number of requests currently admitted.
    pub fn resident(&self) -> usize {
        match &self.state {
            StoreState::Naive(cache) => cache.resident(),
            StoreState::Slots(pool) => pool.resident(),
        }
    }

    pub fn is_admitted(&self, id: &str) -> bool {
        match &self.state {
            StoreState::Naive(cache) => cache.is_admitted(id),
            StoreState::Slots(pool) => pool.is_admitted(id),
        }
    }

    /// Tokens already incorporated for the current cohort.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Reserves cache residency for a request.
    ///
    /// For the slot pool this binds a free slot, clearing any stale
    /// contents left by a previous occupant; a saturated pool yields
    /// [`CacheError::Full`] and the caller must not advance the request
    /// this step. The naive strategy always succeeds.
    pub fn admit(&mut self, id: &str) -> Result<(), CacheError> {
        match &mut self.state {
            StoreState::Naive(cache) => {
                cache.admit(id);
                Ok(())
            }
            StoreState::Slots(pool) => pool.admit(id).map(|_| ()),
        }
    }

    /// Frees the residency of a request. Idempotent: releasing an id that
    /// is not resident is a no-op.
    pub fn release(&mut self, id: &str) {
        match &mut self.state {
            StoreState::Naive(cache) => cache.release(id),
            StoreState::Slots(pool) => pool.release(id),
        }
    }

    /// Zeroes the shared position base and drops all cached contents while
    /// keeping residency bindings. Invoked on any cohort membership change.
    pub fn reset(&mut self) {
        self.sequence_length = 0;
        match &mut self.state {
            StoreState::Naive(cache) => cache.clear(),
            StoreState::Slots(pool) => pool.clear_contents(),
        }
    }

    /// Current cache contents for the admitted cohort, in the supplied
    /// batch order, shaped `[n_layers, batch, seq, n_kv_heads, head_dim]`.
    pub fn view(&self, order: &[String]) -> (B, B) {
        if self.sequence_length == 0 {
            let empty = B::zeros(
                &[
                    self.shape.n_layers,
                    order.len(),
                    0,
                    self.shape.n_kv_heads,
                    self.shape.head_dim,
                ],
                &self.device,
            );
            return (empty.clone(), empty);
        }
        match &self.state {
            StoreState::Naive(cache) => cache.view(),
            StoreState::Slots(pool) => pool.view(order),
        }
    }

    /// Appends freshly computed key/value slices, one batch row per
    /// admitted request in the supplied order, advancing the shared base
    /// by the number of newly processed positions.
    pub fn update(&mut self, keys: B, values: B, order: &[String]) {
        let advanced = keys.shape()[KV_SEQ_DIM];
        match &mut self.state {
            StoreState::Naive(cache) => cache.append(keys, values),
            StoreState::Slots(pool) => pool.append(keys, values, order),
        }
        self.sequence_length += advanced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CpuTensor;

    fn params() -> Hyperparameters {
        Hyperparameters {
            seq_len: 32,
            n_layers: 2,
            n_heads: 2,
            n_kv_heads: 2,
            vocab_size: 16,
            hidden_dim: 8,
        }
    }

    fn store(strategy: CacheStrategy, capacity: usize) -> KvCacheStore<CpuTensor> {
        KvCacheStore::new(strategy, &params(), capacity, ())
    }

    fn delta(batch: usize, seq: usize, fill: f32) -> CpuTensor {
        // [n_layers=2, batch, seq, n_kv_heads=2, head_dim=4]
        let len = 2 * batch * seq * 2 * 4;
        CpuTensor::new(vec![2, batch, seq, 2, 4], vec![fill; len])
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn naive_always_admits() {
        let mut store = store(CacheStrategy::Naive, 1);
        for i in 0..10 {
            assert!(store.admit(&format!("r{i}")).is_ok());
        }
        assert_eq!(store.resident(), 10);
        assert_eq!(store.capacity(), None);
    }

    #[test]
    fn slot_pool_enforces_capacity() {
        let mut store = store(CacheStrategy::Continuous, 2);
        assert!(store.admit("a").is_ok());
        assert!(store.admit("b").is_ok());
        let err = store.admit("c").unwrap_err();
        assert!(matches!(err, CacheError::Full { capacity: 2 }));
        assert_eq!(store.resident(), 2);
    }

    #[test]
    fn release_frees_a_slot_for_reuse() {
        let mut store = store(CacheStrategy::Continuous, 1);
        store.admit("a").unwrap();
        assert!(store.admit("b").is_err());
        store.release("a");
        assert!(store.admit("b").is_ok());
        assert!(store.is_admitted("b"));
        assert!(!store.is_admitted("a"));
    }

    #[test]
    fn release_is_idempotent() {
        let mut store = store(CacheStrategy::Continuous, 2);
        store.admit("a").unwrap();
        store.release("a");
        store.release("a");
        store.release("never-admitted");
        assert_eq!(store.resident(), 0);
    }

    #[test]
    fn empty_view_has_zero_sequence() {
        let store = store(CacheStrategy::Continuous, 2);
        let (keys, values) = store.view(&ids(&["a", "b"]));
        assert_eq!(keys.shape(), vec![2, 2, 0, 2, 4]);
        assert_eq!(values.shape(), vec![2, 2, 0, 2, 4]);
    }

    #[test]
    fn update_grows_the_shared_base() {
        let mut store = store(CacheStrategy::Continuous, 2);
        let order = ids(&["a", "b"]);
        store.admit("a").unwrap();
        store.admit("b").unwrap();

        store.update(delta(2, 5, 1.0), delta(2, 5, 1.0), &order);
        assert_eq!(store.sequence_length(), 5);
        let (keys, _) = store.view(&order);
        assert_eq!(keys.shape(), vec![2, 2, 5, 2, 4]);

        store.update(delta(2, 1, 2.0), delta(2, 1, 2.0), &order);
        assert_eq!(store.sequence_length(), 6);
        let (keys, _) = store.view(&order);
        assert_eq!(keys.shape(), vec![2, 2, 6, 2, 4]);
    }

    #[test]
    fn naive_update_grows_monolithically() {
        let mut store = store(CacheStrategy::Naive, 1);
        let order = ids(&["a", "b", "c"]);
        for id in &order {
            store.admit(id).unwrap();
        }
        store.update(delta(3, 4, 1.0), delta(3, 4, 1.0), &order);
        store.update(delta(3, 1, 2.0), delta(3, 1, 2.0), &order);
        let (keys, _) = store.view(&order);
        assert_eq!(keys.shape(), vec![2, 3, 5, 2, 4]);
        assert_eq!(store.sequence_length(), 5);
    }

    #[test]
    fn reset_zeroes_base_and_drops_contents() {
        let mut store = store(CacheStrategy::Continuous, 2);
        let order = ids(&["a"]);
        store.admit("a").unwrap();
        store.update(delta(1, 3, 1.0), delta(1, 3, 1.0), &order);
        assert_eq!(store.sequence_length(), 3);

        store.reset();
        assert_eq!(store.sequence_length(), 0);
        // Binding survives the reset; contents do not.
        assert!(store.is_admitted("a"));
        let (keys, _) = store.view(&order);
        assert_eq!(keys.shape(), vec![2, 1, 0, 2, 4]);
    }

    #[test]
    fn rebound_slot_starts_clean() {
        let mut store = store(CacheStrategy::Continuous, 1);
        let first = ids(&["a"]);
        store.admit("a").unwrap();
        store.update(delta(1, 4, 7.0), delta(1, 4, 7.0), &first);

        store.release("a");
        store.reset();
        store.admit("b").unwrap();

        let second = ids(&["b"]);
        let (keys, _) = store.view(&second);
        assert_eq!(keys.shape(), vec![2, 1, 0, 2, 4]);

        // The new occupant only ever sees its own writes.
        store.update(delta(1, 2, 9.0), delta(1, 2, 9.0), &second);
        let (keys, _) = store.view(&second);
        assert_eq!(keys.shape(), vec![2, 1, 2, 2, 4]);
        assert!(keys.data().iter().all(|&v| v == 9.0));
    }

    #[test]
    fn slot_view_follows_batch_order() {
        let mut store = store(CacheStrategy::Continuous, 2);
        store.admit("a").unwrap();
        store.admit("b").unwrap();

        // Write distinguishable rows: row 0 fill 1.0, row 1 fill 2.0.
        let mut data = Vec::new();
        for _layer in 0..2 {
            for row in 0..2 {
                data.extend(vec![(row + 1) as f32; 8]);
            }
        }
        let keys = CpuTensor::new(vec![2, 2, 1, 2, 4], data.clone());
        let values = CpuTensor::new(vec![2, 2, 1, 2, 4], data);
        store.update(keys, values, &ids(&["a", "b"]));

        // Reversed order must produce reversed rows.
        let (keys, _) = store.view(&ids(&["b", "a"]));
        let rows = keys.vectorize_dim(1);
        assert!(rows[0].data().iter().all(|&v| v == 2.0));
        assert!(rows[1].data().iter().all(|&v| v == 1.0));
    }
}
