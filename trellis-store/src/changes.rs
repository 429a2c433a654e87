//! Batch change accumulator.
//!
//! One `Changes` is threaded through a batch and the async revalidation
//! pass that follows it. It records which objects a batch added or
//! modified (collection queries use this to decide whether membership may
//! have shifted) and which cache keys were already updated (so the
//! invalidation fan-out skips them). Shared as `Arc<Changes>`; interior
//! locks keep each method a short critical section.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use trellis_core::{ApiName, ObjectHolder};

use crate::keys::CacheKey;

#[derive(Default)]
pub struct Changes {
    added_objects: Mutex<Vec<(ApiName, Arc<ObjectHolder>)>>,
    modified_objects: Mutex<Vec<(ApiName, Arc<ObjectHolder>)>>,
    modified_keys: Mutex<HashSet<CacheKey>>,
}

impl Changes {
    pub fn new() -> Arc<Changes> {
        Arc::new(Changes::default())
    }

    pub fn is_empty(&self) -> bool {
        self.added_objects.lock().unwrap().is_empty()
            && self.modified_objects.lock().unwrap().is_empty()
            && self.modified_keys.lock().unwrap().is_empty()
    }

    /// Record an object the batch wrote. `is_new` distinguishes objects the
    /// cache had never seen (list membership may have changed) from updates
    /// to known objects (which flow through the normalized entries).
    pub fn register_object(&self, api_name: &str, object: Arc<ObjectHolder>, is_new: bool) {
        let bucket = if is_new {
            &self.added_objects
        } else {
            &self.modified_objects
        };
        bucket
            .lock()
            .unwrap()
            .push((api_name.to_string(), object));
    }

    /// Record that a cache key was updated by this batch.
    pub fn mark_modified(&self, key: &CacheKey) {
        self.modified_keys.lock().unwrap().insert(key.clone());
    }

    pub fn is_modified(&self, key: &CacheKey) -> bool {
        self.modified_keys.lock().unwrap().contains(key)
    }

    /// API names with at least one added object.
    pub fn added_api_names(&self) -> HashSet<ApiName> {
        self.added_objects
            .lock()
            .unwrap()
            .iter()
            .map(|(api, _)| api.clone())
            .collect()
    }

    /// Added objects of one type.
    pub fn added_of(&self, api_name: &str) -> Vec<Arc<ObjectHolder>> {
        self.added_objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(api, _)| api == api_name)
            .map(|(_, obj)| Arc::clone(obj))
            .collect()
    }

    /// API names with at least one modified object.
    pub fn modified_api_names(&self) -> HashSet<ApiName> {
        self.modified_objects
            .lock()
            .unwrap()
            .iter()
            .map(|(api, _)| api.clone())
            .collect()
    }

    /// One-line description for debug logging.
    pub fn summary(&self) -> String {
        format!(
            "added={} modified={} keys={}",
            self.added_objects.lock().unwrap().len(),
            self.modified_objects.lock().unwrap().len(),
            self.modified_keys.lock().unwrap().len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CacheKeyData, CacheKeys, ObjectKey};

    fn make_key(keys: &CacheKeys, pk: &str) -> CacheKey {
        keys.get(CacheKeyData::Object(ObjectKey {
            api_name: "Employee".to_string(),
            primary_key: pk.into(),
            rdp: None,
            include_rid: false,
        }))
    }

    #[test]
    fn test_empty_until_something_recorded() {
        let changes = Changes::new();
        assert!(changes.is_empty());

        let obj = Arc::new(ObjectHolder::new("Employee", "emp1"));
        changes.register_object("Employee", obj, true);
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_added_and_modified_buckets_are_separate() {
        let changes = Changes::new();
        let new = Arc::new(ObjectHolder::new("Employee", "emp1"));
        let known = Arc::new(ObjectHolder::new("Office", "nyc"));

        changes.register_object("Employee", new, true);
        changes.register_object("Office", known, false);

        assert!(changes.added_api_names().contains("Employee"));
        assert!(!changes.added_api_names().contains("Office"));
        assert!(changes.modified_api_names().contains("Office"));
        assert_eq!(changes.added_of("Employee").len(), 1);
        assert!(changes.added_of("Office").is_empty());
    }

    #[test]
    fn test_modified_key_tracking() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let changes = Changes::new();

        assert!(!changes.is_modified(&key));
        changes.mark_modified(&key);
        assert!(changes.is_modified(&key));
    }
}
