pub mod embed_backfill;
pub mod gateway;
pub mod schema;

pub use embed_backfill::{
    backfill_embeddings, backfill_embeddings_with_progress, BackfillError, BackfillOptions, BackfillReport, RetryPolicy,
};
pub use gateway::{connect_pool, PgGateway, RowStore, SqlParam, StorageError};
pub use schema::TableName;
