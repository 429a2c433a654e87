//! Per-cache-key push channels.
//!
//! One subject per cache key, created on demand. A subject is an explicit
//! observer list plus a latest-value cell: `next` delivers synchronously to
//! every current subscriber, and a new subscriber immediately receives the
//! last known payload (or an init payload if nothing was ever emitted).
//! Delivery rides on unbounded `tokio::sync::mpsc` senders so notifying
//! never blocks; dead subscribers are pruned on send failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::keys::CacheKey;
use crate::layer::Entry;

/// What subscribers receive: the entry plus whether the effective value
/// currently differs from truth.
#[derive(Debug, Clone)]
pub struct SubjectPayload {
    pub entry: Arc<Entry>,
    pub is_optimistic: bool,
}

/// A live subscription to one cache key.
pub struct Subscription {
    id: u64,
    key: CacheKey,
    receiver: mpsc::UnboundedReceiver<SubjectPayload>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next payload. Returns `None` once the subject is gone.
    pub async fn recv(&mut self) -> Option<SubjectPayload> {
        self.receiver.recv().await
    }

    /// Non-blocking read of the next buffered payload.
    pub fn try_recv(&mut self) -> Option<SubjectPayload> {
        self.receiver.try_recv().ok()
    }
}

struct SubjectInner {
    latest: Option<SubjectPayload>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<SubjectPayload>)>,
}

/// Registry of subjects, one per cache key.
pub struct Subjects {
    map: Mutex<HashMap<CacheKey, SubjectInner>>,
    next_id: AtomicU64,
}

impl Subjects {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Latest payload for a key, without creating the subject.
    pub fn peek_latest(&self, key: &CacheKey) -> Option<SubjectPayload> {
        self.map
            .lock()
            .unwrap()
            .get(key)
            .and_then(|subject| subject.latest.clone())
    }

    /// Whether a subject exists for this key.
    pub fn has_subject(&self, key: &CacheKey) -> bool {
        self.map.lock().unwrap().contains_key(key)
    }

    /// Whether anyone is currently subscribed to this key.
    pub fn observed(&self, key: &CacheKey) -> bool {
        self.map
            .lock()
            .unwrap()
            .get(key)
            .map(|subject| subject.subscribers.iter().any(|(_, tx)| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Subscribe to a key, creating its subject if needed. The subscriber
    /// immediately receives the subject's latest payload, or `initial` when
    /// nothing was ever emitted.
    pub fn subscribe(&self, key: &CacheKey, initial: SubjectPayload) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut map = self.map.lock().unwrap();
        let subject = map.entry(key.clone()).or_insert_with(|| SubjectInner {
            latest: None,
            subscribers: Vec::new(),
        });

        let replay = subject.latest.clone().unwrap_or(initial);
        let _ = tx.send(replay);
        subject.subscribers.push((id, tx));

        Subscription {
            id,
            key: key.clone(),
            receiver: rx,
        }
    }

    /// Drop one subscriber from a key's subject.
    pub fn unsubscribe(&self, key: &CacheKey, subscription_id: u64) {
        if let Some(subject) = self.map.lock().unwrap().get_mut(key) {
            subject.subscribers.retain(|(id, _)| *id != subscription_id);
        }
    }

    /// Emit a payload to every subscriber of a key and retain it as the
    /// latest value. With `create == false` the emission is skipped when no
    /// subject exists (used by layer removal, which must not conjure
    /// subjects for keys nobody asked about).
    pub fn next(&self, key: &CacheKey, payload: SubjectPayload, create: bool) {
        let mut map = self.map.lock().unwrap();
        let subject = if create {
            map.entry(key.clone()).or_insert_with(|| SubjectInner {
                latest: None,
                subscribers: Vec::new(),
            })
        } else {
            match map.get_mut(key) {
                Some(subject) => subject,
                None => return,
            }
        };

        subject.latest = Some(payload.clone());
        subject
            .subscribers
            .retain(|(_, tx)| tx.send(payload.clone()).is_ok());
    }

    /// Drop a key's subject entirely (used on explicit eviction).
    pub fn remove(&self, key: &CacheKey) {
        self.map.lock().unwrap().remove(key);
    }
}

impl Default for Subjects {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CacheKeyData, CacheKeys, ObjectKey};
    use crate::layer::{CacheValue, Status};
    use serde_json::json;
    use trellis_core::ObjectHolder;

    fn make_key(keys: &CacheKeys, pk: &str) -> CacheKey {
        keys.get(CacheKeyData::Object(ObjectKey {
            api_name: "Employee".to_string(),
            primary_key: pk.into(),
            rdp: None,
            include_rid: false,
        }))
    }

    fn payload(key: &CacheKey, name: &str, is_optimistic: bool) -> SubjectPayload {
        let obj = ObjectHolder::new("Employee", "emp1").with_property("name", json!(name));
        SubjectPayload {
            entry: Entry::new(
                key.clone(),
                Some(CacheValue::Object(Arc::new(obj))),
                Status::Loaded,
                None,
            ),
            is_optimistic,
        }
    }

    fn init_payload(key: &CacheKey) -> SubjectPayload {
        SubjectPayload {
            entry: Entry::init(key.clone()),
            is_optimistic: false,
        }
    }

    #[tokio::test]
    async fn test_new_subscriber_receives_init_payload() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let subjects = Subjects::new();

        let mut sub = subjects.subscribe(&key, init_payload(&key));
        let first = sub.recv().await.expect("replay payload");
        assert_eq!(first.entry.status, Status::Init);
        assert!(!first.is_optimistic);
    }

    #[tokio::test]
    async fn test_next_delivers_to_all_subscribers() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let subjects = Subjects::new();

        let mut sub_a = subjects.subscribe(&key, init_payload(&key));
        let mut sub_b = subjects.subscribe(&key, init_payload(&key));
        // Drain the replays.
        sub_a.recv().await.unwrap();
        sub_b.recv().await.unwrap();

        subjects.next(&key, payload(&key, "Alice", true), true);

        assert!(sub_a.try_recv().expect("delivered to a").is_optimistic);
        assert!(sub_b.try_recv().expect("delivered to b").is_optimistic);
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_latest() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let subjects = Subjects::new();

        subjects.next(&key, payload(&key, "Alice", false), true);

        let mut sub = subjects.subscribe(&key, init_payload(&key));
        let first = sub.recv().await.expect("replayed latest");
        assert_eq!(first.entry.status, Status::Loaded);
    }

    #[test]
    fn test_peek_does_not_create() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let subjects = Subjects::new();

        assert!(subjects.peek_latest(&key).is_none());
        assert!(!subjects.has_subject(&key));

        // next without create stays a no-op
        subjects.next(&key, payload(&key, "Alice", false), false);
        assert!(!subjects.has_subject(&key));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let subjects = Subjects::new();

        let mut sub = subjects.subscribe(&key, init_payload(&key));
        sub.recv().await.unwrap();
        let id = sub.id();

        subjects.unsubscribe(&key, id);
        subjects.next(&key, payload(&key, "Alice", false), true);
        assert!(sub.try_recv().is_none());
        assert!(!subjects.observed(&key));
    }
}
