//! Durable store contract and the custom data producer hook

use async_trait::async_trait;
use std::future::Future;

use crate::{BoxError, QueryParams, RecordData, RecordPayload};

/// Trait for the durable store of record.
///
/// Implementations can use SQLite, D1, Postgres, or an HTTP service. Listing
/// queries may embed a `total` attribute in each row for paging.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Fetch one record, or None if it doesn't exist
    async fn get_by_table_and_id(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<RecordPayload>, BoxError>;

    /// Fetch a filtered, sorted, paginated listing
    async fn get_by_table(
        &self,
        table: &str,
        params: &QueryParams,
    ) -> Result<Vec<RecordPayload>, BoxError>;

    /// Insert a record, returning the stored row
    async fn insert(&self, table: &str, record: RecordPayload) -> Result<RecordPayload, BoxError>;

    /// Update a record, returning the stored row
    async fn update(&self, table: &str, record: RecordPayload) -> Result<RecordPayload, BoxError>;

    /// Delete a record
    async fn delete_by_table_and_id(&self, table: &str, id: &str) -> Result<(), BoxError>;
}

/// Replacement for the default table fetch, e.g. a join or an aggregate.
///
/// Its result alone determines the returned data and its total. Any
/// `Fn() -> impl Future<Output = Result<RecordData, BoxError>>` closure qualifies.
#[async_trait]
pub trait DataProducer: Send + Sync {
    async fn produce(&self) -> Result<RecordData, BoxError>;
}

#[async_trait]
impl<F, Fut> DataProducer for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<RecordData, BoxError>> + Send,
{
    async fn produce(&self) -> Result<RecordData, BoxError> {
        (self)().await
    }
}
