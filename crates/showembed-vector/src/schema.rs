//! Table naming and SQL for the show table the backfill reads and updates.
//!
//! Expected columns: `id BIGINT` (unique, ordered), `title TEXT`,
//! `description TEXT`, `listed_in TEXT`, `embedding_vector vector(D) NULL`.

use crate::gateway::StorageError;

pub const ID_COLUMN: &str = "id";
pub const EMBEDDING_COLUMN: &str = "embedding_vector";
pub const TEXT_COLUMNS: [&str; 3] = ["title", "description", "listed_in"];

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    pub fn new<S, T>(schema: S, table: T) -> Result<Self, StorageError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(StorageError::InvalidIdentifier("schema name is required".into()));
        }
        if table.trim().is_empty() {
            return Err(StorageError::InvalidIdentifier("table name is required".into()));
        }
        Ok(Self { schema, table })
    }

    /// Quoted `"schema"."table"` reference.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

/// `$1` is the last seen id (NULL at the start), `$2` the batch size.
///
/// The id is widened to `bigint` so `integer`/`serial` keys decode as `i64` too.
pub fn select_unembedded_sql(table: &TableName) -> String {
    format!(
        "SELECT {id}::bigint AS {id}, {cols} FROM {table} \
         WHERE {emb} IS NULL AND ($1::bigint IS NULL OR {id} > $1) \
         ORDER BY {id} ASC LIMIT $2",
        id = ID_COLUMN,
        cols = TEXT_COLUMNS.join(", "),
        table = table.qualified(),
        emb = EMBEDDING_COLUMN,
    )
}

/// `$1` is the vector literal, `$2` the row id.
pub fn update_embedding_sql(table: &TableName) -> String {
    format!(
        "UPDATE {table} SET {emb} = $1::vector WHERE {id} = $2",
        table = table.qualified(),
        emb = EMBEDDING_COLUMN,
        id = ID_COLUMN,
    )
}

pub fn count_unembedded_sql(table: &TableName) -> String {
    format!("SELECT COUNT(*) FROM {} WHERE {} IS NULL", table.qualified(), EMBEDDING_COLUMN)
}
