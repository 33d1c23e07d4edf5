// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! oplog-river - replicate a MongoDB collection into Elasticsearch.
//!
//! Configuration comes from the JSON file named by `$OPLOG_RIVER_CONFIG`
//! (optional) plus `RIVER_*` environment overrides.

use anyhow::Context;
use oplog_river::{ElasticSink, MongoSource, River, RiverConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RiverConfig::load().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.default_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate().context("invalid configuration")?;

    tracing::info!(
        namespace = %config.namespace(),
        index = %config.sink.index,
        version = config.sink.version,
        "Starting oplog-river"
    );

    let source = MongoSource::connect(&config.source)
        .await
        .context("connecting to MongoDB")?;
    let sink = ElasticSink::connect(&config.sink)
        .await
        .context("connecting to Elasticsearch")?;

    let river = River::new(config, Arc::new(source), Arc::new(sink))?;
    river.start().await?;

    wait_for_signal().await?;

    river.shutdown().await;
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("installing Ctrl+C handler")?;
                tracing::info!("Received Ctrl+C, shutting down");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("installing Ctrl+C handler")?;
        tracing::info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
