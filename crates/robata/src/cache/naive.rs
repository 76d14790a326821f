use std::collections::HashSet;

use crate::backend::Backend;
use crate::tensor::constant::KV_SEQ_DIM;

/// Monolithic cache covering the whole cohort in one buffer pair.
///
/// Membership is tracked implicitly; admission cannot fail. The buffer
/// batch dimension always matches the current cohort because the store is
/// reset on every membership change.
pub(super) struct NaiveCache<B: Backend> {
    keys: Option<B>,
    values: Option<B>,
    members: HashSet<String>,
}

impl<B: Backend> NaiveCache<B> {
    pub(super) fn new() -> Self {
        Self {
            keys: None,
            values: None,
            members: HashSet::new(),
        }
    }

    pub(super) fn admit(&mut self, id: &str) {
        self.members.insert(id.to_string());
    }

    pub(super) fn release(&mut self, id: &str) {
        self.members.remove(id);
    }

    pub(super) fn is_admitted(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub(super) fn resident(&self) -> usize {
        self.members.len()
    }

    pub(super) fn clear(&mut self) {
        self.keys = None;
        self.values = None;
    }

    pub(super) fn append(&mut self, keys: B, values: B) {
        self.keys = Some(match self.keys.take() {
            Some(existing) => B::cat(&[existing, keys], KV_SEQ_DIM),
            None => keys,
        });
        self.values = Some(match self.values.take() {
            Some(existing) => B::cat(&[existing, values], KV_SEQ_DIM),
            None => values,
        });
    }

    pub(super) fn view(&self) -> (B, B) {
        let keys = self
            .keys
            .clone()
            .expect("naive cache viewed at nonzero sequence length");
        let values = self
            .values
            .clone()
            .expect("naive cache viewed at nonzero sequence length");
        (keys, values)
    }
}
