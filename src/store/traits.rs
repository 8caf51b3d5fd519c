use crate::model::{MutationTree, Record, RecordId, RecordPage, RecordQuery, Registry, WriteOutcome};
use anyhow::Result;
use serde_json::{Map, Value};

/// Reads and single-record writes outside of a mutation plan
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, resource_type: &str, id: RecordId) -> Result<Option<Record>>;
    /// Filter, sort and paginate records of one type
    async fn find_records(&self, query: &RecordQuery) -> Result<RecordPage>;
    /// Insert a record directly, without validation (fixtures and seeding)
    async fn insert_record(
        &self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record>;
}

#[async_trait::async_trait]
pub trait MutationStore: Send + Sync {
    /// Apply the whole tree inside one transaction. A `Rejected` outcome means
    /// the transaction was rolled back and nothing is observable.
    async fn execute(&self, registry: &Registry, tree: &MutationTree) -> Result<WriteOutcome>;
}

/// Record access within an open transaction, as used by the plan executor
#[async_trait::async_trait]
pub trait RecordTx: Send {
    async fn get(&mut self, resource_type: &str, id: RecordId) -> Result<Option<Record>>;
    async fn select(&mut self, query: &RecordQuery) -> Result<Vec<Record>>;
    async fn insert(
        &mut self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record>;
    async fn update(&mut self, record: &Record) -> Result<()>;
    async fn delete(&mut self, resource_type: &str, id: RecordId) -> Result<bool>;
}

pub trait Store: RecordStore + MutationStore + Send + Sync {}
