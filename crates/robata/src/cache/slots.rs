use crate::backend::Backend;
use crate::error::CacheError;
use crate::tensor::constant::{KV_BATCH_DIM, KV_SEQ_DIM};

/// Sequence dimension of a per-slot tensor, whose batch dimension has been
/// squeezed away.
const SLOT_SEQ_DIM: usize = KV_SEQ_DIM - 1;

struct Slot<B: Backend> {
    bound: Option<String>,
    keys: Option<B>,
    values: Option<B>,
    len: usize,
}

impl<B: Backend> Slot<B> {
    fn empty() -> Self {
        Self {
            bound: None,
            keys: None,
            values: None,
            len: 0,
        }
    }

    fn clear_contents(&mut self) {
        self.keys = None;
        self.values = None;
        self.len = 0;
    }
}

/// Fixed-capacity slot pool: one slot bound per resident request for its
/// lifetime, growing along the sequence dimension in cohort lockstep.
pub(super) struct SlotPool<B: Backend> {
    slots: Vec<Slot<B>>,
}

impl<B: Backend> SlotPool<B> {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn resident(&self) -> usize {
        self.slots.iter().filter(|s| s.bound.is_some()).count()
    }

    pub(super) fn is_admitted(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    fn find(&self, id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.bound.as_deref() == Some(id))
    }

    pub(super) fn admit(&mut self, id: &str) -> Result<usize, CacheError> {
        if let Some(index) = self.find(id) {
            return Ok(index);
        }
        let Some(index) = self.slots.iter().position(|s| s.bound.is_none()) else {
            return Err(CacheError::Full {
                capacity: self.slots.len(),
            });
        };
        let slot = &mut self.slots[index];
        slot.bound = Some(id.to_string());
        // A freed slot may still hold its previous occupant's tensors;
        // nothing stale may leak into the new request's valid range.
        slot.clear_contents();
        Ok(index)
    }

    pub(super) fn release(&mut self, id: &str) {
        if let Some(index) = self.find(id) {
            let slot = &mut self.slots[index];
            slot.bound = None;
            slot.clear_contents();
        }
    }

    pub(super) fn clear_contents(&mut self) {
        for slot in &mut self.slots {
            slot.clear_contents();
        }
    }

    pub(super) fn view(&self, order: &[String]) -> (B, B) {
        let mut key_rows = Vec::with_capacity(order.len());
        let mut value_rows = Vec::with_capacity(order.len());
        let mut _cohort_len = None;
        for id in order {
            let slot = &self.slots[self
                .find(id)
                .expect("cache viewed for a request that was never admitted")];
            // All cohort slots grow in lockstep from the shared base.
            debug_assert_eq!(*_cohort_len.get_or_insert(slot.len), slot.len);
            let keys = slot
                .keys
                .clone()
                .expect("slot viewed at nonzero sequence length");
            let values = slot
                .values
                .clone()
                .expect("slot viewed at nonzero sequence length");
            key_rows.push(keys.unsqueeze(KV_BATCH_DIM));
            value_rows.push(values.unsqueeze(KV_BATCH_DIM));
        }
        (
            B::cat(&key_rows, KV_BATCH_DIM),
            B::cat(&value_rows, KV_BATCH_DIM),
        )
    }

    pub(super) fn append(&mut self, keys: B, values: B, order: &[String]) {
        let key_rows = keys.vectorize_dim(KV_BATCH_DIM);
        let value_rows = values.vectorize_dim(KV_BATCH_DIM);
        let advanced = key_rows
            .first()
            .map(|row| row.shape()[SLOT_SEQ_DIM])
            .unwrap_or(0);
        for ((id, key_row), value_row) in order.iter().zip(key_rows).zip(value_rows) {
            let index = self
                .find(id)
                .expect("cache updated for a request that was never admitted");
            let slot = &mut self.slots[index];
            slot.keys = Some(match slot.keys.take() {
                Some(existing) => B::cat(&[existing, key_row], SLOT_SEQ_DIM),
                None => key_row,
            });
            slot.values = Some(match slot.values.take() {
                Some(existing) => B::cat(&[existing, value_row], SLOT_SEQ_DIM),
                None => value_row,
            });
            slot.len += advanced;
        }
    }
}
