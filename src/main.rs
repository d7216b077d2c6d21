//! Weather ingestion service — binary entrypoint.
//! Loads config, starts the fetch → publish loop, and serves `/metrics` plus
//! the query API until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weather_ingest::metrics::Metrics;
use weather_ingest::publish::kafka::KafkaBroker;
use weather_ingest::store::{MirroredBroker, StoreWriter, TimeSeriesStore};
use weather_ingest::{api, shutdown_channel, Config, HttpSource, IngestLoop, Publisher};

/// JSON logs when LOG_FORMAT=json, compact otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("weather_ingest=info,ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        cities = ?cfg.cities.as_slice(),
        brokers = %cfg.broker.brokers,
        topic = %cfg.broker.topic,
        "configuration loaded"
    );

    let metrics = Metrics::init().context("install prometheus recorder")?;

    let store = TimeSeriesStore::with_capacity(cfg.store_rows_per_city);
    let kafka = KafkaBroker::connect(&cfg.broker).context("create kafka producer")?;
    let broker = MirroredBroker::new(kafka, StoreWriter::new(store.clone()));
    let publisher = Publisher::new(
        Arc::new(broker),
        cfg.broker.topic.clone(),
        cfg.broker.ack_timeout(),
    );
    let source = Arc::new(HttpSource::new(&cfg.provider));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let app = api::router(store).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("bind {}", cfg.http_addr))?;
    tracing::info!(addr = %cfg.http_addr, "serving /metrics and query API");
    let mut http_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let ingest = IngestLoop::new(cfg.cities.clone(), source, publisher, cfg.scheduler.clone())
        .spawn(shutdown_rx);

    tokio::signal::ctrl_c().await.context("listen for ctrl-c")?;
    tracing::info!("received Ctrl+C, shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    let summary = ingest.await.context("ingest loop task")?;
    tracing::info!(?summary, "ingest loop finished");

    server.await.context("http server task")??;
    Ok(())
}
