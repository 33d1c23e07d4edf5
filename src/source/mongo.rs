// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB source.
//!
//! Tails `local.oplog.rs` with a tailable-await cursor, so reads block on
//! the server until new entries arrive. The oplog only exists on replica set
//! members.

use super::{BoxFuture, DocumentStream, OplogSource, TailFilter};
use crate::config::SourceConfig;
use crate::error::{Result, RiverError};
use bson::{doc, Document};
use futures::StreamExt;
use mongodb::options::{ClientOptions, CursorType, FindOptions};
use mongodb::Client;
use tracing::{debug, info};

const OPLOG_DATABASE: &str = "local";
const OPLOG_COLLECTION: &str = "oplog.rs";

/// [`OplogSource`] backed by a MongoDB replica set.
#[derive(Clone)]
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    /// Connect and ping the server.
    ///
    /// An unreachable server is an error here, before any pipeline task
    /// starts.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let timeout = config.connect_timeout_duration();

        let mut options = ClientOptions::parse(config.address.as_str())
            .await
            .map_err(|e| RiverError::mongo("parse_address", e))?;
        options.app_name = Some("oplog-river".to_string());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options).map_err(|e| RiverError::mongo("connect", e))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| RiverError::mongo("ping", e))?;

        info!(address = %config.address, "Connected to MongoDB");
        Ok(Self { client })
    }
}

impl OplogSource for MongoSource {
    fn tail(&self, filter: TailFilter) -> BoxFuture<'_, DocumentStream> {
        Box::pin(async move {
            let query = filter.to_document();
            debug!(query = %query, "Opening oplog tail");

            let options = FindOptions::builder()
                .cursor_type(CursorType::TailableAwait)
                .no_cursor_timeout(true)
                .build();
            let cursor = self
                .client
                .database(OPLOG_DATABASE)
                .collection::<Document>(OPLOG_COLLECTION)
                .find(query, options)
                .await
                .map_err(|e| RiverError::mongo("tail", e))?;

            Ok(cursor
                .map(|item| item.map_err(|e| RiverError::mongo("tail", e)))
                .boxed())
        })
    }

    fn scan(&self, database: String, collection: String) -> BoxFuture<'_, DocumentStream> {
        Box::pin(async move {
            let cursor = self
                .client
                .database(&database)
                .collection::<Document>(&collection)
                .find(None, None)
                .await
                .map_err(|e| RiverError::mongo("scan", e))?;

            Ok(cursor
                .map(|item| item.map_err(|e| RiverError::mongo("scan", e)))
                .boxed())
        })
    }
}
