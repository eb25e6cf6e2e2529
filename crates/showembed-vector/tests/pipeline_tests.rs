//! Backfill pipeline against an in-memory row store and test embedders.
mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{fast_options, titled, MemoryStore};
use showembed_core::{Cursor, Embedder, Error, InferenceOutput, ShowRecord};
use showembed_embed::{EmbeddingProvider, FakeEmbedder};
use showembed_vector::embed_backfill::SetupStage;
use showembed_vector::{backfill_embeddings, backfill_embeddings_with_progress, BackfillError};

const DIM: usize = 8;

fn fake_provider() -> EmbeddingProvider {
    EmbeddingProvider::with_loader("fake", || Ok(Box::new(FakeEmbedder::new(DIM)) as Box<dyn Embedder>))
}

/// Counts calls and fails whenever an input contains "poison" or `always_fail` is set.
struct FlakyEmbedder {
    calls: Arc<AtomicUsize>,
    always_fail: bool,
    drop_last: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str { "flaky" }
    fn dim(&self) -> usize { DIM }
    fn max_len(&self) -> usize { 64 }
    fn infer(&self, texts: &[String]) -> showembed_core::Result<InferenceOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        if self.always_fail || texts.iter().any(|t| t.contains("poison")) {
            return Err(Error::Inference("model exploded".into()));
        }
        let fake = FakeEmbedder::new(DIM);
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| fake.embed_text(t)).collect();
        if self.drop_last { vectors.pop(); }
        Ok(InferenceOutput::PerInput(vectors))
    }
}

struct Flaky {
    provider: EmbeddingProvider,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

fn flaky_provider(always_fail: bool, drop_last: bool) -> Flaky {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (Arc::clone(&calls), Arc::clone(&seen));
    let provider = EmbeddingProvider::with_loader("flaky", move || {
        Ok(Box::new(FlakyEmbedder { calls: Arc::clone(&c), always_fail, drop_last, seen: Arc::clone(&s) }) as Box<dyn Embedder>)
    });
    Flaky { provider, calls, seen }
}

#[tokio::test]
async fn backfill_fills_every_row_and_rerun_is_a_noop() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(7);
    let provider = fake_provider();

    let report = backfill_embeddings(&provider, &store, &fast_options(3)).await?;
    assert_eq!(report.batches, 3);
    assert_eq!(report.processed, 7);
    assert_eq!(report.last_cursor, Cursor::After(7));
    assert!(store.null_ids().is_empty());

    let before = store.embedding(4);
    let again = backfill_embeddings(&provider, &store, &fast_options(3)).await?;
    assert_eq!(again.batches, 0);
    assert_eq!(again.processed, 0);
    assert_eq!(store.embedding(4), before, "stored vectors are never rewritten");
    assert_eq!(before.map(|v| v.len()), Some(DIM));
    Ok(())
}

#[tokio::test]
async fn cursor_only_moves_forward_and_no_row_is_fetched_twice() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(10);
    backfill_embeddings(&fake_provider(), &store, &fast_options(4)).await?;

    let fetches = store.fetches.lock().unwrap().clone();
    assert_eq!(fetches, vec![Cursor::Start, Cursor::After(4), Cursor::After(8), Cursor::After(10)]);
    assert!(fetches.windows(2).all(|w| w[0] < w[1]));

    let ids = store.fetched_ids.lock().unwrap().clone();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn failing_batch_is_attempted_exactly_max_retries_times() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(2);
    let flaky = flaky_provider(true, false);

    let report = backfill_embeddings(&flaky.provider, &store, &fast_options(10)).await?;
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.skipped_batches, 1);
    assert_eq!(report.skipped_records, 2);
    assert_eq!(report.processed, 0);
    assert_eq!(store.null_ids(), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn skipped_batch_does_not_stop_later_batches() -> anyhow::Result<()> {
    let mut records: Vec<ShowRecord> = (1..=6).map(|id| titled(id, &format!("Show {id}"))).collect();
    records[2].title = Some("poison pill".into());
    let store = MemoryStore::new(records);
    let flaky = flaky_provider(false, false);

    let report = backfill_embeddings(&flaky.provider, &store, &fast_options(2)).await?;
    assert_eq!(report.batches, 3);
    assert_eq!(report.skipped_batches, 1);
    assert_eq!(report.processed, 4);
    assert_eq!(store.null_ids(), vec![3, 4], "skipped rows wait for the next run");
    Ok(())
}

#[tokio::test]
async fn one_failed_update_leaves_siblings_written() -> anyhow::Result<()> {
    let mut store = MemoryStore::with_titles(5);
    store.failing_ids.insert(2);

    let report = backfill_embeddings(&fake_provider(), &store, &fast_options(5)).await?;
    assert_eq!(report.processed, 4);
    assert_eq!(report.failed_updates, 1);
    assert_eq!(store.null_ids(), vec![2]);
    Ok(())
}

#[tokio::test]
async fn fewer_vectors_than_records_leaves_the_tail_null() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(3);
    let flaky = flaky_provider(false, true);
    let mut opts = fast_options(3);
    opts.max_batches = Some(1);

    let report = backfill_embeddings(&flaky.provider, &store, &opts).await?;
    assert_eq!(report.processed, 2);
    assert_eq!(store.null_ids(), vec![3]);
    Ok(())
}

#[tokio::test]
async fn inputs_are_labelled_fields_joined_in_order() -> anyhow::Result<()> {
    let record = ShowRecord {
        id: 1,
        title: Some("X".into()),
        description: Some(String::new()),
        listed_in: Some("Y".into()),
    };
    let blank = ShowRecord { id: 2, ..Default::default() };
    let store = MemoryStore::new(vec![record, blank]);
    let flaky = flaky_provider(false, false);

    let report = backfill_embeddings(&flaky.provider, &store, &fast_options(10)).await?;
    assert_eq!(report.processed, 2, "records without text are embedded too");
    assert_eq!(*flaky.seen.lock().unwrap(), vec!["Title: X. Genres: Y".to_string(), String::new()]);
    Ok(())
}

#[tokio::test]
async fn fetch_error_ends_the_run_without_failing_it() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(3);
    store.fail_fetch.store(true, Ordering::SeqCst);

    let report = backfill_embeddings(&fake_provider(), &store, &fast_options(2)).await?;
    assert_eq!(report.batches, 0);
    assert!(report.fetch_error.is_some());
    Ok(())
}

#[tokio::test]
async fn model_load_failure_is_a_setup_error() {
    let store = MemoryStore::with_titles(1);
    let provider = EmbeddingProvider::with_loader("broken", || Err(anyhow::anyhow!("weights missing")));

    let err = backfill_embeddings(&provider, &store, &fast_options(1)).await.unwrap_err();
    let BackfillError::Setup { stage, .. } = &err;
    assert_eq!(*stage, SetupStage::ModelInit);
    assert_eq!(err.exit_code(), 1);
    assert!(store.fetches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_store_is_a_setup_error() {
    let store = MemoryStore::with_titles(1);
    store.healthy.store(false, Ordering::SeqCst);

    let err = backfill_embeddings(&fake_provider(), &store, &fast_options(1)).await.unwrap_err();
    let BackfillError::Setup { stage, .. } = &err;
    assert_eq!(*stage, SetupStage::StoreHealth);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn persist_concurrency_is_capped_by_pool_capacity() -> anyhow::Result<()> {
    let mut store = MemoryStore::with_titles(12);
    store.capacity = 2;
    let mut opts = fast_options(12);
    opts.persist_concurrency = 50;

    let report = backfill_embeddings(&fake_provider(), &store, &opts).await?;
    assert_eq!(report.processed, 12);
    let peak = store.max_in_flight.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak in-flight updates was {peak}");
    Ok(())
}

#[tokio::test]
async fn batch_limit_and_progress_callback() -> anyhow::Result<()> {
    let store = MemoryStore::with_titles(5);
    let mut opts = fast_options(2);
    opts.max_batches = Some(2);
    let called = AtomicBool::new(false);
    let mut totals = Vec::new();

    let report = backfill_embeddings_with_progress(&fake_provider(), &store, &opts, |r| {
        called.store(true, Ordering::SeqCst);
        totals.push(r.processed);
    })
    .await?;
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(totals, vec![2, 4]);
    assert_eq!(report.batches, 2);
    assert_eq!(store.null_ids(), vec![5]);
    Ok(())
}
