// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - connection: Accepted socket handle and its lifecycle state
// - registry:   Lock-guarded holding areas between pipeline stages
// - ingest:     Listener / watcher / reader / closer tasks
// - queue:      Inbound message queue and its dispatcher
// - collector:  Unique-id set, rolling windows and rollover loop
// - exporter:   Snapshot to Prometheus metric mapping
// - http:       `/metrics` scrape endpoint
// - metrics:    Internal pipeline counters
//
mod config;
mod connection;
mod registry;
mod ingest;
mod queue;
mod collector;
mod exporter;
mod http;
mod metrics;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::sync::Arc;

use anyhow::Context;
use tokio::time::{interval_at, Instant};

use collector::{Collector, runner::run_rollover};
use config::resolve_config;
use exporter::Exporter;
use metrics::METRICS;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging
// - Load configuration
// - Build the collector and exporter
// - Start the ingestion pipeline, rollover loop, dispatcher,
//   metrics endpoint and stats reporter
// - Exit with an error when the ingestion listener or the
//   metrics endpoint stops accepting
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --------------------------------------------------------
    // Load configuration
    //
    // Usage: activity-collector [config.json]
    // --------------------------------------------------------
    let config_arg = std::env::args().nth(1);
    let config = resolve_config(config_arg.as_deref()).context("invalid configuration")?;
    log::info!(
        "windows={:?}s rollover_interval={}s",
        config.windows,
        config.rollover_interval_secs
    );

    // --------------------------------------------------------
    // Aggregation core
    // --------------------------------------------------------
    let collector = Arc::new(Collector::new(&config.windows));
    let exporter = Arc::new(Exporter::new(collector.clone())?);

    tokio::spawn(run_rollover(collector.clone(), config.rollover_interval()));

    // --------------------------------------------------------
    // Dispatcher: inbound payloads into the collector
    // --------------------------------------------------------
    let (queue, dispatcher) = queue::inbound_queue();
    tokio::spawn({
        let collector = collector.clone();
        dispatcher.run(move |id| collector.process(&id))
    });

    // --------------------------------------------------------
    // Periodic pipeline stats (low-noise)
    // --------------------------------------------------------
    let report_interval = config.report_interval();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + report_interval, report_interval);
        loop {
            ticker.tick().await;
            log::info!("{}", METRICS.summary());
        }
    });

    // --------------------------------------------------------
    // Outer surfaces
    //
    // Both loops run until accepting fails. Whichever stops
    // first ends the process; restart policy belongs to the
    // supervisor.
    // --------------------------------------------------------
    let metrics_listener = http::bind_metrics(config.metrics_addr).await?;
    let ingest_listener = ingest::bind(&config.socket_path)?;

    let result = tokio::select! {
        res = ingest::serve(ingest_listener, queue) => res.context("ingestion listener stopped"),
        res = http::serve_metrics(metrics_listener, exporter) => res.context("metrics endpoint stopped"),
    };

    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}
