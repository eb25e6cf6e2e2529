//! Row store gateway over a Postgres connection pool.
//!
//! Every call acquires one pooled connection for its own duration; the
//! connection goes back to the pool when it drops, on success and on error.
//! The gateway never retries.
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use showembed_core::config::DatabaseSettings;
use showembed_core::types::vector_literal;
use showembed_core::{Cursor, RecordId, ShowRecord};

use crate::schema::{count_unembedded_sql, select_unembedded_sql, update_embedding_sql, TableName};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// What the backfill pipeline and the health endpoint need from storage.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Trivial round trip used to confirm connectivity.
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Up to `limit` rows with a NULL embedding and id strictly after `cursor`, id ascending.
    async fn fetch_unembedded(&self, cursor: Cursor, limit: usize) -> Result<Vec<ShowRecord>, StorageError>;

    /// Write one vector; returns the number of rows updated.
    async fn store_embedding(&self, id: RecordId, vector: &[f32]) -> Result<u64, StorageError>;

    /// Connections this store can serve at once.
    fn connection_capacity(&self) -> usize {
        usize::MAX
    }
}

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    NullableInt(Option<i64>),
    Text(String),
}

fn bind_all<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &'q [SqlParam]) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::NullableInt(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

pub fn connect_pool(settings: &DatabaseSettings) -> Result<PgPool, StorageError> {
    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| sqlx::Error::Configuration("DATABASE_URL is not set".into()))?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect_lazy(url)?;
    info!(max_connections = settings.max_connections, "PostgreSQL pool created");
    Ok(pool)
}

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
    table: TableName,
    select_sql: String,
    update_sql: String,
}

impl PgGateway {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        let select_sql = select_unembedded_sql(&table);
        let update_sql = update_embedding_sql(&table);
        Self { pool, table, select_sql, update_sql }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Run a statement on one pooled connection and return its rows.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&mut *conn).await?;
        Ok(rows)
    }

    /// Run a statement on one pooled connection and return the affected row count.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let done = bind_all(sqlx::query(sql), params).execute(&mut *conn).await?;
        Ok(done.rows_affected())
    }

    pub async fn count_unembedded(&self) -> Result<u64, StorageError> {
        let rows = self.query(&count_unembedded_sql(&self.table), &[]).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn record_from_row(row: &PgRow) -> Result<ShowRecord, StorageError> {
    Ok(ShowRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        listed_in: row.try_get("listed_in")?,
    })
}

#[async_trait]
impl RowStore for PgGateway {
    async fn health_check(&self) -> Result<(), StorageError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    async fn fetch_unembedded(&self, cursor: Cursor, limit: usize) -> Result<Vec<ShowRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let params = [SqlParam::NullableInt(cursor.last_id()), SqlParam::Int(limit)];
        let rows = self.query(&self.select_sql, &params).await?;
        debug!(%cursor, rows = rows.len(), "fetched unembedded rows");
        rows.iter().map(record_from_row).collect()
    }

    async fn store_embedding(&self, id: RecordId, vector: &[f32]) -> Result<u64, StorageError> {
        let params = [SqlParam::Text(vector_literal(vector)), SqlParam::Int(id)];
        self.execute(&self.update_sql, &params).await
    }

    fn connection_capacity(&self) -> usize {
        self.pool.options().get_max_connections() as usize
    }
}
