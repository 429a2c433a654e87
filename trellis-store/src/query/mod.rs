//! Query lifecycle.
//!
//! A query is a long-lived object bound 1:1 to a cache key. It owns the
//! fetch state machine (`init → loading → {loaded | error}`, with loaded
//! and error able to return to loading on revalidate), dedupes concurrent
//! fetches through a shared in-flight future, and answers type-based
//! invalidation requests.

pub mod aggregation;
pub mod interface_list;
pub mod list;
pub mod object;

pub use aggregation::AggregationQuery;
pub use interface_list::InterfaceListQuery;
pub use list::ListQuery;
pub use object::ObjectQuery;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use trellis_core::TrellisResult;

use crate::changes::Changes;
use crate::keys::CacheKey;
use crate::layer::Status;
use crate::optimistic::OptimisticId;

/// The in-flight fetch, shareable between concurrent callers.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, ()>>;

/// Fetch state shared by every query kind.
pub struct QueryState {
    status: Mutex<Status>,
    last_fetch_completed: Mutex<Option<Instant>>,
    in_flight: Mutex<Option<SharedFetch>>,
    dedupe_interval: Duration,
}

impl QueryState {
    pub fn new(dedupe_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(Status::Init),
            last_fetch_completed: Mutex::new(None),
            in_flight: Mutex::new(None),
            dedupe_interval,
        })
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn in_flight(&self) -> Option<SharedFetch> {
        self.in_flight.lock().unwrap().clone()
    }

    fn within_dedupe_window(&self) -> bool {
        self.last_fetch_completed
            .lock()
            .unwrap()
            .map(|at| at.elapsed() < self.dedupe_interval)
            .unwrap_or(false)
    }

    /// Start a fetch, or join the one already in flight. The in-flight slot
    /// is cleared and the completion time stamped when the fetch resolves.
    pub(crate) async fn run<F>(self: Arc<Self>, make_fetch: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()>,
    {
        let shared = {
            let mut guard = self.in_flight.lock().unwrap();
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    self.set_status(Status::Loading);
                    let state = Arc::clone(&self);
                    let fetch = make_fetch();
                    let wrapped: SharedFetch = async move {
                        fetch.await;
                        *state.last_fetch_completed.lock().unwrap() = Some(Instant::now());
                        *state.in_flight.lock().unwrap() = None;
                    }
                    .boxed()
                    .shared();
                    *guard = Some(wrapped.clone());
                    wrapped
                }
            }
        };
        shared.await;
    }

    /// Revalidate with dedupe: an in-flight fetch is joined instead of
    /// duplicated, and a non-forced request inside the dedupe window is
    /// satisfied from cache.
    pub(crate) async fn revalidate<F>(self: Arc<Self>, force: bool, make_fetch: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()>,
    {
        if let Some(existing) = self.in_flight() {
            existing.await;
            return;
        }
        if !force && self.within_dedupe_window() {
            return;
        }
        self.run(make_fetch).await;
    }
}

/// Operations every query kind supports, used by the Store's fan-outs.
#[async_trait]
pub trait Query: Send + Sync {
    fn cache_key(&self) -> &CacheKey;

    fn status(&self) -> Status;

    /// Fetch (or refetch) and store. `force` bypasses the dedupe window.
    async fn revalidate(&self, force: bool);

    /// React to a type-level invalidation: force-revalidate when this query
    /// depends on `api_name`, recording the cache key into `changes`.
    async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Arc<Changes>,
    ) -> TrellisResult<()>;

    /// Post-batch hook: decide whether the batch's changes require a
    /// refetch of this query.
    async fn maybe_update_and_revalidate(
        &self,
        changes: Arc<Changes>,
        optimistic_id: Option<OptimisticId>,
    ) -> TrellisResult<()>;
}

/// A typed handle to one live query, as stored in the Store's registry.
#[derive(Clone)]
pub enum QueryHandle {
    Object(Arc<ObjectQuery>),
    List(Arc<ListQuery>),
    InterfaceList(Arc<InterfaceListQuery>),
    Aggregation(Arc<AggregationQuery>),
}

impl QueryHandle {
    pub fn as_query(&self) -> Arc<dyn Query> {
        match self {
            QueryHandle::Object(q) => Arc::clone(q) as Arc<dyn Query>,
            QueryHandle::List(q) => Arc::clone(q) as Arc<dyn Query>,
            QueryHandle::InterfaceList(q) => Arc::clone(q) as Arc<dyn Query>,
            QueryHandle::Aggregation(q) => Arc::clone(q) as Arc<dyn Query>,
        }
    }

    pub fn cache_key(&self) -> &CacheKey {
        match self {
            QueryHandle::Object(q) => q.cache_key(),
            QueryHandle::List(q) => q.cache_key(),
            QueryHandle::InterfaceList(q) => q.cache_key(),
            QueryHandle::Aggregation(q) => q.cache_key(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            QueryHandle::Object(q) => q.status(),
            QueryHandle::List(q) => q.status(),
            QueryHandle::InterfaceList(q) => q.status(),
            QueryHandle::Aggregation(q) => q.status(),
        }
    }
}
