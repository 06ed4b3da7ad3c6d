//! Import new result files into the record database, then exit.
use std::path::Path;

use envconfig::Envconfig;
use eyre::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use record_common::database;
use record_ingest::config::Config;
use record_ingest::ingest::ingest_directory;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::init_from_env()?;

    let pool = database::connect(&config.database_url, config.max_db_connections).await?;
    database::migrate(&pool).await?;

    let summary = ingest_directory(
        &pool,
        Path::new(&config.results_dir),
        config.result_extension.as_str(),
    )
    .await?;

    info!(
        imported = summary.imported,
        already_imported = summary.already_imported,
        empty_template = summary.empty_template,
        malformed = summary.malformed,
        bad_file_name = summary.bad_file_name,
        failed = summary.failed,
        records_replaced = summary.records_replaced,
        personal_bests = summary.personal_bests,
        race_summaries = summary.race_summaries,
        "ingestion finished"
    );

    pool.close().await;

    Ok(())
}
