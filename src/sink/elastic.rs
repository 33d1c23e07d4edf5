// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Elasticsearch sink over HTTP.
//!
//! # Wire Layout
//!
//! ```text
//! PUT    /{index}/{type}/{id}               document body without _id
//! DELETE /{index}/{type}/{id}               404 counts as success
//! GET    /{index}/river/settings?...        one settings key
//! POST   /{index}/river/settings/_update    {"doc": {key: value}, "doc_as_upsert": true}
//! ```
//!
//! Insert and update are both full-document index requests, which makes them
//! upserts by id.
//!
//! # Versions
//!
//! The cluster version is resolved once in [`ElasticSink::new`]. It only
//! changes how a settings value is read back:
//!
//! | Version | Query | Value at |
//! |---------|-------|----------|
//! | 1.x, 2.x | `?fields=key` | `fields.key[0]` |
//! | 3.x, 5.x | `?_source_include=key` | `_source.key` |

use super::{BoxFuture, Sink};
use crate::config::{SinkConfig, SinkVersion};
use crate::error::{Result, RiverError};
use bson::{Bson, Document};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Document type and id of the settings document inside the index.
const SETTINGS_TYPE: &str = "river";
const SETTINGS_ID: &str = "settings";

/// How a single settings key is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsReadback {
    /// Stored fields: `fields.key` is an array
    Fields,
    /// Source filtering: `_source.key` is the value
    Source,
}

impl SettingsReadback {
    fn for_version(version: SinkVersion) -> Self {
        match version {
            SinkVersion::V1 | SinkVersion::V2 => SettingsReadback::Fields,
            SinkVersion::V5 => SettingsReadback::Source,
        }
    }

    fn query_param(&self) -> &'static str {
        match self {
            SettingsReadback::Fields => "fields",
            SettingsReadback::Source => "_source_include",
        }
    }

    fn extract(&self, body: &Value, key: &str) -> Option<Value> {
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return None;
        }
        match self {
            SettingsReadback::Fields => match body.get("fields")?.get(key)? {
                Value::Array(values) => values.first().cloned(),
                other => Some(other.clone()),
            },
            SettingsReadback::Source => body.get("_source")?.get(key).cloned(),
        }
    }
}

/// [`Sink`] backed by an Elasticsearch index.
pub struct ElasticSink {
    client: Client,
    candidates: Vec<Url>,
    base: Url,
    index: String,
    doc_type: String,
    version: SinkVersion,
    readback: SettingsReadback,
}

impl ElasticSink {
    /// Build the adapter without touching the network.
    ///
    /// Fails on an unsupported version or an unparsable URL.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let version = config.sink_version()?;

        let candidates = config
            .urls()
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| RiverError::Config(format!("sink.url {}: {}", raw, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let base = candidates
            .first()
            .cloned()
            .ok_or_else(|| RiverError::Config("sink.url has no usable address".into()))?;
        if base.cannot_be_a_base() {
            return Err(RiverError::Config(format!("sink.url {} is not a base URL", base)));
        }

        let client = Client::builder()
            .timeout(config.request_timeout_duration())
            .build()
            .map_err(|e| RiverError::http("build_client", e))?;

        Ok(Self {
            client,
            candidates,
            base,
            index: config.index.clone(),
            doc_type: config.doc_type.clone(),
            version,
            readback: SettingsReadback::for_version(version),
        })
    }

    /// Build the adapter and pick the first configured URL that answers.
    ///
    /// Any HTTP response to `HEAD /{index}` counts, including 404: the index
    /// is created by the first write.
    pub async fn connect(config: &SinkConfig) -> Result<Self> {
        let mut sink = Self::new(config)?;
        let mut last_error = None;

        for candidate in sink.candidates.clone() {
            sink.base = candidate.clone();
            let url = sink.url(&[sink.index.as_str()])?;
            match sink.client.head(url).send().await {
                Ok(response) => {
                    info!(
                        url = %candidate,
                        index = %sink.index,
                        status = response.status().as_u16(),
                        "Connected to sink"
                    );
                    return Ok(sink);
                }
                Err(e) => {
                    warn!(url = %candidate, error = %e, "Sink address unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => RiverError::http("connect", e),
            None => RiverError::sink_msg("connect", "no sink address configured"),
        })
    }

    pub fn version(&self) -> SinkVersion {
        self.version
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RiverError::Config(format!("sink.url {} is not a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document_url(&self, id: &str) -> Result<Url> {
        self.url(&[self.index.as_str(), self.doc_type.as_str(), id])
    }

    async fn put_document(&self, operation: &'static str, id: String, document: Document) -> Result<()> {
        let url = self.document_url(&id)?;
        let body = document_body(document);
        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RiverError::http(operation, e))?;
        ensure_success(operation, response).await?;
        debug!(id = %id, index = %self.index, doc_type = %self.doc_type, operation, "Indexed document");
        Ok(())
    }
}

/// JSON body for a document: relaxed extended JSON, `_id` removed.
fn document_body(mut document: Document) -> Value {
    document.remove("_id");
    Bson::Document(document).into_relaxed_extjson()
}

async fn ensure_success(operation: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RiverError::sink_status(operation, status.as_u16(), body))
}

impl Sink for ElasticSink {
    fn insert(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        Box::pin(self.put_document("insert", id, document))
    }

    fn update(&self, id: String, document: Document) -> BoxFuture<'_, ()> {
        Box::pin(self.put_document("update", id, document))
    }

    fn remove(&self, id: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let url = self.document_url(&id)?;
            let response = self
                .client
                .delete(url)
                .send()
                .await
                .map_err(|e| RiverError::http("remove", e))?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(id = %id, index = %self.index, "Document already absent");
                return Ok(());
            }
            ensure_success("remove", response).await?;
            debug!(id = %id, index = %self.index, doc_type = %self.doc_type, "Deleted document");
            Ok(())
        })
    }

    fn get_setting(&self, key: &'static str) -> BoxFuture<'_, Option<Value>> {
        Box::pin(async move {
            let mut url = self.url(&[self.index.as_str(), SETTINGS_TYPE, SETTINGS_ID])?;
            url.query_pairs_mut()
                .append_pair(self.readback.query_param(), key);

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| RiverError::http("get_setting", e))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = ensure_success("get_setting", response).await?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| RiverError::http("get_setting", e))?;
            Ok(self.readback.extract(&body, key))
        })
    }

    fn set_setting(&self, key: &'static str, value: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let url = self.url(&[self.index.as_str(), SETTINGS_TYPE, SETTINGS_ID, "_update"])?;
            let body = json!({ "doc": { key: value }, "doc_as_upsert": true });
            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| RiverError::http("set_setting", e))?;
            ensure_success("set_setting", response).await?;
            Ok(())
        })
    }
}
