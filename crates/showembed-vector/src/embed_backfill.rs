//! Cursor-driven embedding backfill.
//!
//! Rows with a NULL `embedding_vector` are fetched in id order, strictly after
//! the last id seen. The cursor moves past a batch before it is embedded, so a
//! batch that cannot be embedded is left NULL for the next run instead of
//! being fetched again in this one. Per batch: embed with a fixed-delay retry,
//! then write every vector with bounded concurrency. Only setup failures abort
//! the run; batch-level failures are logged and counted.
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use showembed_core::config::BackfillSettings;
use showembed_core::{Batch, Cursor, RecordId};
use showembed_embed::EmbeddingProvider;

use crate::gateway::{RowStore, StorageError};

/// Fixed-delay retry: exactly `max_retries` attempts, `delay` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5, delay: Duration::from_millis(1000) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub inter_batch_delay: Duration,
    pub persist_concurrency: usize,
    /// Stop after this many fetched batches.
    pub max_batches: Option<usize>,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self::from(&BackfillSettings::default())
    }
}

impl From<&BackfillSettings> for BackfillOptions {
    fn from(s: &BackfillSettings) -> Self {
        Self {
            batch_size: s.batch_size,
            retry: RetryPolicy { max_retries: s.max_retries, delay: Duration::from_millis(s.retry_delay_ms) },
            inter_batch_delay: Duration::from_millis(s.inter_batch_delay_ms),
            persist_concurrency: s.persist_concurrency,
            max_batches: s.max_batches,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub batches: usize,
    pub processed: usize,
    pub skipped_batches: usize,
    pub skipped_records: usize,
    pub failed_updates: usize,
    pub last_cursor: Cursor,
    /// Set when a fetch failed and ended the run early.
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    ModelInit,
    StoreHealth,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::ModelInit => f.write_str("model initialization"),
            SetupStage::StoreHealth => f.write_str("database health check"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("backfill setup failed during {stage}: {reason}")]
    Setup { stage: SetupStage, reason: String },
}

impl BackfillError {
    /// Process exit status for the backfill binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackfillError::Setup { .. } => 1,
        }
    }
}

enum Stage {
    Fetch,
    Embed(Batch),
    Persist(Batch, Vec<Vec<f32>>),
    Done,
}

pub async fn backfill_embeddings(
    provider: &EmbeddingProvider,
    store: &dyn RowStore,
    opts: &BackfillOptions,
) -> Result<BackfillReport, BackfillError> {
    backfill_embeddings_with_progress(provider, store, opts, |_| {}).await
}

/// Same as [`backfill_embeddings`], calling `on_batch` after every fetched batch.
pub async fn backfill_embeddings_with_progress<F>(
    provider: &EmbeddingProvider,
    store: &dyn RowStore,
    opts: &BackfillOptions,
    mut on_batch: F,
) -> Result<BackfillReport, BackfillError>
where
    F: FnMut(&BackfillReport),
{
    provider.initialize().await.map_err(|e| {
        error!("Failed to initialize embedding model: {e}");
        BackfillError::Setup { stage: SetupStage::ModelInit, reason: e.to_string() }
    })?;
    store.health_check().await.map_err(|e| {
        error!("Database health check failed: {e}");
        BackfillError::Setup { stage: SetupStage::StoreHealth, reason: e.to_string() }
    })?;

    let bound = opts.persist_concurrency.min(store.connection_capacity()).max(1);
    info!(batch_size = opts.batch_size, persist_bound = bound, "Starting embedding backfill");

    let mut report = BackfillReport::default();
    let mut cursor = Cursor::Start;
    let mut stage = Stage::Fetch;

    loop {
        stage = match stage {
            Stage::Fetch => {
                if opts.max_batches.is_some_and(|max| report.batches >= max) {
                    info!(batches = report.batches, "Reached batch limit");
                    Stage::Done
                } else {
                    match store.fetch_unembedded(cursor, opts.batch_size).await {
                        Ok(records) if records.is_empty() => Stage::Done,
                        Ok(records) => {
                            let batch = Batch::new(records, cursor);
                            if batch.cursor_after <= cursor {
                                // A store that ignores the cursor would loop forever.
                                let msg = format!("cursor did not advance past {cursor}");
                                error!("{msg}");
                                report.fetch_error = Some(msg);
                                Stage::Done
                            } else {
                                cursor = batch.cursor_after;
                                report.batches += 1;
                                report.last_cursor = cursor;
                                debug!(batch = report.batches, size = batch.len(), %cursor, "Fetched batch");
                                Stage::Embed(batch)
                            }
                        }
                        Err(e) => {
                            error!("Error fetching records: {e}");
                            report.fetch_error = Some(e.to_string());
                            Stage::Done
                        }
                    }
                }
            }
            Stage::Embed(batch) => match embed_with_retry(provider, &batch.inputs(), &opts.retry).await {
                Some(vectors) => Stage::Persist(batch, vectors),
                None => {
                    warn!(
                        size = batch.len(),
                        from = %batch.cursor_before,
                        "Skipping batch after {} failed attempts",
                        opts.retry.max_retries
                    );
                    report.skipped_batches += 1;
                    report.skipped_records += batch.len();
                    on_batch(&report);
                    Stage::Fetch
                }
            },
            Stage::Persist(batch, vectors) => {
                let outcome = persist_batch(store, &batch, vectors, bound).await;
                report.processed += outcome.updated;
                report.failed_updates += outcome.failed;
                info!(
                    batch = report.batches,
                    updated = outcome.updated,
                    failed = outcome.failed,
                    total = report.processed,
                    "Batch persisted"
                );
                on_batch(&report);
                if !opts.inter_batch_delay.is_zero() {
                    tokio::time::sleep(opts.inter_batch_delay).await;
                }
                Stage::Fetch
            }
            Stage::Done => break,
        };
    }

    info!(
        processed = report.processed,
        skipped = report.skipped_records,
        failed_updates = report.failed_updates,
        "Backfill finished"
    );
    Ok(report)
}

/// Embed `inputs`, trying exactly `policy.max_retries` times.
///
/// A response with zero vectors counts as a failed attempt.
pub async fn embed_with_retry(
    provider: &EmbeddingProvider,
    inputs: &[String],
    policy: &RetryPolicy,
) -> Option<Vec<Vec<f32>>> {
    for attempt in 1..=policy.max_retries {
        match provider.embed(inputs).await {
            Ok(vectors) if !vectors.is_empty() => return Some(vectors),
            Ok(_) => warn!(attempt, "Embedding returned no vectors"),
            Err(e) => warn!(attempt, max = policy.max_retries, "Embedding attempt failed: {e}"),
        }
        if attempt < policy.max_retries && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub updated: usize,
    pub failed: usize,
}

/// Write each (record, vector) pair, at most `bound` at a time.
///
/// Pairs are zipped, so records beyond the number of vectors stay NULL.
/// A failed write is logged and does not affect its siblings.
pub async fn persist_batch(store: &dyn RowStore, batch: &Batch, vectors: Vec<Vec<f32>>, bound: usize) -> PersistOutcome {
    if vectors.len() != batch.len() {
        warn!(records = batch.len(), vectors = vectors.len(), "Vector count differs from batch size; pairing by position");
    }
    let pairs: Vec<(RecordId, Vec<f32>)> = batch.records.iter().map(|r| r.id).zip(vectors).collect();

    let results: Vec<(RecordId, Result<u64, StorageError>)> = stream::iter(pairs)
        .map(|(id, vector)| async move { (id, store.store_embedding(id, &vector).await) })
        .buffer_unordered(bound.max(1))
        .collect()
        .await;

    let mut outcome = PersistOutcome::default();
    for (id, result) in results {
        match result {
            Ok(0) => {
                warn!(id, "Update matched no rows");
                outcome.failed += 1;
            }
            Ok(_) => outcome.updated += 1,
            Err(e) => {
                error!(id, "Failed to store embedding: {e}");
                outcome.failed += 1;
            }
        }
    }
    outcome
}
