//! Batched reads and writes.
//!
//! A batch applies a set of cache mutations as one atomic unit. Writes go
//! to the truth layer, or — when the batch carries an [`OptimisticId`] — to
//! an optimistic layer that is only materialized on the first write, so a
//! read-only batch never leaves an empty layer behind. Subject
//! notifications are buffered per key and flushed after the batch closure
//! returns: subscribers never observe a partially-applied batch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::changes::Changes;
use crate::keys::CacheKey;
use crate::layer::{entry_opt_ptr_eq, value_opt_ptr_eq, CacheValue, Entry, Status};
use crate::optimistic::OptimisticId;
use crate::store::Store;
use crate::subject::SubjectPayload;

use trellis_core::TrellisError;

/// Mutation surface handed to a batch closure. Queries and the Store talk
/// to the layers only through this.
pub struct BatchContext<'a> {
    store: &'a Store,
    optimistic_id: Option<OptimisticId>,
    layer_created: bool,
    changes: Arc<Changes>,
    pending: Vec<(CacheKey, SubjectPayload)>,
    pending_index: HashMap<CacheKey, usize>,
}

impl<'a> BatchContext<'a> {
    pub(crate) fn new(
        store: &'a Store,
        optimistic_id: Option<OptimisticId>,
        changes: Arc<Changes>,
    ) -> Self {
        Self {
            store,
            optimistic_id,
            layer_created: false,
            changes,
            pending: Vec::new(),
            pending_index: HashMap::new(),
        }
    }

    /// The store this batch mutates. Returned at the batch's lifetime so
    /// callers can hold it across their own `&mut self` calls.
    pub(crate) fn store(&self) -> &'a Store {
        self.store
    }

    /// Whether writes in this batch land in an optimistic layer.
    pub fn is_optimistic(&self) -> bool {
        self.optimistic_id.is_some()
    }

    pub fn optimistic_id(&self) -> Option<OptimisticId> {
        self.optimistic_id
    }

    pub fn changes(&self) -> &Arc<Changes> {
        &self.changes
    }

    fn create_layer_if_needed(&mut self) {
        if let Some(id) = self.optimistic_id {
            if !self.layer_created {
                self.store.layers_mut().add_layer(id);
                self.layer_created = true;
            }
        }
    }

    /// Write an entry for `key`. Returns the entry written. Queues a
    /// notification when the key's effective value changed by reference.
    pub fn write(
        &mut self,
        key: &CacheKey,
        value: Option<CacheValue>,
        status: Status,
    ) -> Arc<Entry> {
        self.write_with_error(key, value, status, None)
    }

    /// Write an entry carrying an error (used for `Status::Error`).
    pub fn write_with_error(
        &mut self,
        key: &CacheKey,
        value: Option<CacheValue>,
        status: Status,
        error: Option<Arc<TrellisError>>,
    ) -> Arc<Entry> {
        self.create_layer_if_needed();

        let entry = Entry::new(key.clone(), value, status, error);
        let notification = {
            let mut layers = self.store.layers_mut();
            let old_top = layers.top_get(key);

            if self.optimistic_id.is_some() {
                layers.set_top(key.clone(), Arc::clone(&entry));
            } else {
                layers.set_truth(key.clone(), Arc::clone(&entry));
            }

            let new_top = layers.top_get(key);
            if entry_opt_ptr_eq(old_top.as_ref(), new_top.as_ref()) {
                None
            } else {
                let new_top = new_top.expect("key was just written");
                let truth = layers.truth_get(key);
                let is_optimistic = !value_opt_ptr_eq(
                    new_top.value.as_ref(),
                    truth.as_ref().and_then(|entry| entry.value.as_ref()),
                );
                Some(SubjectPayload {
                    entry: new_top,
                    is_optimistic,
                })
            }
        };

        if let Some(payload) = notification {
            self.queue_notification(key, payload);
        }
        self.changes.mark_modified(key);

        entry
    }

    /// Mark `key` as deleted by writing a tombstone.
    pub fn delete(&mut self, key: &CacheKey, status: Status) -> Arc<Entry> {
        self.write(key, Some(CacheValue::Tombstone), status)
    }

    /// Layer-scoped read: the optimistic layer's entry when this batch is
    /// optimistic, else the truth entry. Callers that want the globally
    /// effective value use [`Store::get_value`].
    pub fn read(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        let layers = self.store.layers_ref();
        if self.optimistic_id.is_some() {
            layers.top_get(key)
        } else {
            layers.truth_get(key)
        }
    }

    fn queue_notification(&mut self, key: &CacheKey, payload: SubjectPayload) {
        match self.pending_index.get(key) {
            // Last write per key wins; keep the original position so
            // flush order follows first-write order.
            Some(&idx) => self.pending[idx].1 = payload,
            None => {
                self.pending_index.insert(key.clone(), self.pending.len());
                self.pending.push((key.clone(), payload));
            }
        }
    }

    /// Deliver the buffered notifications. Called once, after the batch
    /// closure has returned.
    pub(crate) fn flush(self) {
        for (key, payload) in self.pending {
            self.store.subjects().next(&key, payload, /* create */ true);
        }
    }
}
