use std::env;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use showembed_core::config::Config;
use showembed_embed::EmbeddingProvider;
use showembed_vector::{backfill_embeddings_with_progress, connect_pool, BackfillOptions, PgGateway, TableName};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn usage_error(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    eprintln!("Usage: showembed-backfill [--batch-size N] [--max-batches N]");
    std::process::exit(1);
}

fn parse_number(args: &[String], i: usize, flag: &str) -> usize {
    args.get(i + 1)
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| usage_error(&format!("{flag} requires a positive number")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    let mut opts = BackfillOptions::from(&settings.backfill);

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--batch-size" => { opts.batch_size = parse_number(&args, i, "--batch-size"); i += 1; }
            "--max-batches" => { opts.max_batches = Some(parse_number(&args, i, "--max-batches")); i += 1; }
            other => usage_error(&format!("unknown argument {other}")),
        }
        i += 1;
    }

    println!("🎬 Show embedding backfill\n=========================");
    let pool = connect_pool(&settings.database)?;
    let table = TableName::new(settings.backfill.schema.clone(), settings.backfill.table.clone())?;
    println!("Table: {}", table.qualified());
    let store = PgGateway::new(pool, table);
    let provider = EmbeddingProvider::new(settings.embedding.clone());

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(120));

    let result = backfill_embeddings_with_progress(&provider, &store, &opts, |report| {
        bar.set_message(format!(
            "batches={} embedded={} skipped={} failed_updates={}",
            report.batches, report.processed, report.skipped_records, report.failed_updates
        ));
    })
    .await;
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            match &report.fetch_error {
                Some(e) => warn!("Stopped early after a fetch error: {e}"),
                None => match store.count_unembedded().await {
                    Ok(remaining) => info!(remaining, "Rows still without embeddings"),
                    Err(e) => warn!("Could not count remaining rows: {e}"),
                },
            }
            println!("\n✅ Embedding backfill finished");
            println!("📊 Embedded {} rows in {} batches", report.processed, report.batches);
            if report.skipped_records > 0 || report.failed_updates > 0 {
                println!("⚠️  {} rows skipped, {} updates failed; rerun to retry them", report.skipped_records, report.failed_updates);
            }
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
