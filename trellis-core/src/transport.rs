//! Transport seam: the engine's window to the remote service.
//!
//! The cache engine treats the transport as an opaque async fetcher.
//! Failures must be reported as `Err`; the query layer maps any error to
//! an `error` status. Retry policy, if any, belongs to the transport, not
//! the engine.

use async_trait::async_trait;

use crate::error::TrellisResult;
use crate::filter::OrderByClause;
use crate::object::{ObjectHolder, ObjectPage, PrimaryKey};
use crate::objectset::ObjectSetSpec;
use crate::rdp::{AggregationResult, AggregationSpec};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a single object by primary key.
    async fn fetch_object(
        &self,
        api_name: &str,
        primary_key: &PrimaryKey,
        include_rid: bool,
    ) -> TrellisResult<ObjectHolder>;

    /// Fetch one page of an object set. Passing the previous page's token
    /// continues the iteration; `None` starts from the beginning.
    async fn fetch_page(
        &self,
        object_set: &ObjectSetSpec,
        order_by: &[OrderByClause],
        page_token: Option<&str>,
    ) -> TrellisResult<ObjectPage>;

    /// Execute an aggregation over an object set.
    async fn aggregate(
        &self,
        object_set: &ObjectSetSpec,
        spec: &AggregationSpec,
    ) -> TrellisResult<AggregationResult>;
}
