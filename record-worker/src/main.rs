//! Post pending lap record, personal best and race result announcements to Discord.
use axum::{routing::get, Router};
use envconfig::Envconfig;
use eyre::Result;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use health::HealthRegistry;
use record_common::announcements::AnnouncementQueue;
use record_common::database;
use record_common::metrics::{serve, setup_metrics_routes};
use record_worker::config::Config;
use record_worker::notifier::DiscordWebhookNotifier;
use record_worker::worker::AnnouncementWorker;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");
    // A cycle sends at most two batches, each send bounded by the request timeout.
    let deadline = config.poll_interval.0 * 2
        + config.request_timeout.0 * config.batch_size.saturating_mul(2);
    let delivery_liveness = liveness.register("delivery".to_string(), deadline).await;

    let pool = database::connect(&config.database_url, config.max_db_connections).await?;
    database::migrate(&pool).await?;

    let notifier = DiscordWebhookNotifier::new(
        config.discord_webhook_url.as_str(),
        config.request_timeout.0,
    )?;

    let worker = AnnouncementWorker::new(
        config.worker_name.as_str(),
        AnnouncementQueue::new_from_pool(pool),
        notifier,
        config.poll_interval.0,
        config.batch_size,
        delivery_liveness,
    );

    let router = Router::new().route(
        "/_liveness",
        get(move || std::future::ready(liveness.get_status())),
    );
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to start serving liveness and metrics: {}", e);
        }
    });

    worker.run().await;

    Ok(())
}
