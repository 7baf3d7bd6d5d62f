//! REST client for a hosted realtime database.
//!
//! Uses `reqwest` for plain requests and for the `text/event-stream`
//! subscription feed:
//!
//! - `GET  {base}/{path}.json` with `Accept: text/event-stream` - subscribe
//! - `PATCH {base}/{path}.json` - write-merge
//! - `POST {base}/{path}.json` - push, answers `{"name": "<new key>"}`
//! - `DELETE {base}/{path}.json` - delete
//!
//! Every request carries `auth=<token>` when a token is configured.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};
use url::Url;

use super::sse::{FoldOutcome, SnapshotFolder, SseDecoder};
use super::{RemoteStore, StoreError, StoreEvent, StorePath, StoreSubscription};
use crate::config::StoreConfig;

/// Client for a hosted realtime database.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct RealtimeStore {
    inner: Arc<RealtimeStoreInner>,
}

struct RealtimeStoreInner {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<SecretString>,
    write_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl RealtimeStore {
    /// Create a new realtime store client.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(RealtimeStoreInner {
                client: reqwest::Client::new(),
                base_url: config.database_url.clone(),
                auth_token: config.auth_token.clone(),
                write_timeout: config.write_timeout,
            }),
        }
    }

    /// Build the REST URL for `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if the base URL cannot carry a path.
    pub fn url_for(&self, path: &StorePath) -> Result<Url, StoreError> {
        let mut url = self.inner.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::InvalidPath(self.inner.base_url.to_string()))?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{last}.json"));
                }
                None => {
                    segments.push(".json");
                }
            }
        }
        if let Some(token) = &self.inner.auth_token {
            url.query_pairs_mut()
                .append_pair("auth", token.expose_secret());
        }
        Ok(url)
    }

    /// Send a write request and map non-success answers to `StoreError`.
    async fn send_write(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request.timeout(self.inner.write_timeout).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    warn!(status = %status, message = %message, "realtime store rejected request");
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl RemoteStore for RealtimeStore {
    #[instrument(skip_all, fields(path = %path))]
    async fn subscribe(&self, path: &StorePath) -> Result<StoreSubscription, StoreError> {
        let url = self.url_for(path)?;
        let response = self
            .inner
            .client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(pump_events(response, tx));
        debug!("realtime subscription established");
        Ok(StoreSubscription::with_producer(path.clone(), rx, producer))
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let url = self.url_for(path)?;
        self.send_write(self.inner.client.patch(url).json(&fields))
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let url = self.url_for(path)?;
        let response = self
            .send_write(self.inner.client.post(url).json(&value))
            .await?;
        let body = response.text().await?;
        let pushed: PushResponse = serde_json::from_str(&body)?;
        Ok(pushed.name)
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        let url = self.url_for(path)?;
        self.send_write(self.inner.client.delete(url)).await?;
        Ok(())
    }
}

/// Read the event stream until it ends, the subscriber goes away, or the
/// store cancels it.
async fn pump_events(mut response: reqwest::Response, tx: mpsc::UnboundedSender<StoreEvent>) {
    let mut decoder = SseDecoder::new();
    let mut folder = SnapshotFolder::new();

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                let _ = tx.send(Err(StoreError::Closed));
                return;
            }
            Err(e) => {
                let _ = tx.send(Err(StoreError::Http(e)));
                return;
            }
        };

        for event in decoder.feed(&chunk) {
            match folder.apply(&event) {
                Ok(FoldOutcome::Snapshot(snapshot)) => {
                    if tx.send(Ok(snapshot)).is_err() {
                        return;
                    }
                }
                Ok(FoldOutcome::Ignored) => {}
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
    }
}
