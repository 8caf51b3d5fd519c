use anyhow::{Context, Result};
use log::{debug, info};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::model::{
    apply_query, MutationTree, Record, RecordId, RecordPage, RecordQuery, Registry, WriteOutcome,
};
use crate::store::executor::PlanExecutor;
use crate::store::traits::{MutationStore, RecordStore, RecordTx, Store};

const RECORD_COLUMNS: &str = "id, resource_type, attributes, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the records table if it does not exist
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id BIGSERIAL PRIMARY KEY,
                resource_type TEXT NOT NULL,
                attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create records table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS records_resource_type_idx ON records (resource_type)")
            .execute(&self.pool)
            .await
            .context("Failed to create records index")?;

        info!("Records table ready");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> Result<Record> {
    let attributes: Value = row.try_get("attributes").context("Failed to read attributes")?;
    let attributes = match attributes {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => anyhow::bail!("Record attributes must be an object, got {}", other),
    };

    Ok(Record {
        id: row.get("id"),
        resource_type: row.get("resource_type"),
        attributes,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Record access inside one database transaction
pub struct PgRecordTx {
    tx: Transaction<'static, Postgres>,
}

impl PgRecordTx {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool.begin().await.context("Failed to begin transaction")?;
        Ok(Self { tx })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back transaction")
    }
}

#[async_trait::async_trait]
impl RecordTx for PgRecordTx {
    async fn get(&mut self, resource_type: &str, id: RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE resource_type = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(resource_type)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch record")?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn select(&mut self, query: &RecordQuery) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE resource_type = $1 ORDER BY id"
        ))
        .bind(&query.resource_type)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to select records")?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;
        Ok(apply_query(records, query).records)
    }

    async fn insert(
        &mut self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record> {
        let row = sqlx::query(&format!(
            "INSERT INTO records (resource_type, attributes) VALUES ($1, $2) RETURNING {RECORD_COLUMNS}"
        ))
        .bind(resource_type)
        .bind(Value::Object(attributes))
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert record")?;

        record_from_row(&row)
    }

    async fn update(&mut self, record: &Record) -> Result<()> {
        sqlx::query(
            "UPDATE records SET attributes = $1, updated_at = $2 WHERE resource_type = $3 AND id = $4",
        )
        .bind(Value::Object(record.attributes.clone()))
        .bind(record.updated_at)
        .bind(&record.resource_type)
        .bind(record.id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update record")?;

        Ok(())
    }

    async fn delete(&mut self, resource_type: &str, id: RecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE resource_type = $1 AND id = $2")
            .bind(resource_type)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete record")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl RecordStore for PostgresStore {
    async fn get_record(&self, resource_type: &str, id: RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE resource_type = $1 AND id = $2"
        ))
        .bind(resource_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch record")?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_records(&self, query: &RecordQuery) -> Result<RecordPage> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE resource_type = $1 ORDER BY id"
        ))
        .bind(&query.resource_type)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list records")?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;
        Ok(apply_query(records, query))
    }

    async fn insert_record(
        &self,
        resource_type: &str,
        attributes: Map<String, Value>,
    ) -> Result<Record> {
        let row = sqlx::query(&format!(
            "INSERT INTO records (resource_type, attributes) VALUES ($1, $2) RETURNING {RECORD_COLUMNS}"
        ))
        .bind(resource_type)
        .bind(Value::Object(attributes))
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert record")?;

        record_from_row(&row)
    }
}

#[async_trait::async_trait]
impl MutationStore for PostgresStore {
    async fn execute(&self, registry: &Registry, tree: &MutationTree) -> Result<WriteOutcome> {
        let mut tx = PgRecordTx::begin(&self.pool).await?;

        let outcome = match PlanExecutor::new(registry, &mut tx).apply(tree).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tx.rollback().await?;
                return Err(err);
            }
        };

        match &outcome {
            WriteOutcome::Committed(_) => {
                tx.commit().await?;
                debug!("Mutation plan committed");
            }
            WriteOutcome::Rejected(_) => {
                tx.rollback().await?;
                debug!("Mutation plan rolled back");
            }
        }
        Ok(outcome)
    }
}

impl Store for PostgresStore {}
