//! Backend HTTP contract.
//!
//! [`Backend`] is the seam between the client state machine and the network.
//! [`HttpBackend`] implements it over `reqwest`; tests substitute an
//! in-memory fake. Every failure surfaces as a recoverable
//! [`TransportError`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::TransportError;
use crate::model::{AnalyzerConfig, AnalyzerId, AnalyzerStatus, QueueState};
use crate::sse::{SseDecoder, SseFrame};

/// Backend call future type.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Decoded server-sent event frames.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// Response of `GET /api/va/state`. `status` is positional with `ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateResponse {
    pub q_state: QueueState,
    #[serde(default)]
    pub ids: Vec<AnalyzerId>,
    #[serde(default)]
    pub status: Vec<AnalyzerStatus>,
}

/// Response of `POST /api/va/start` and `POST /api/va/stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueResponse {
    pub q_state: QueueState,
    #[serde(default)]
    pub ids: Vec<AnalyzerId>,
}

/// Async interface to the shapeflow backend.
pub trait Backend: Send + Sync {
    /// `GET /ping`
    fn ping(&self) -> BackendFuture<'_, bool>;

    /// `POST /api/va/init`: create an analyzer and return its id.
    fn init(&self) -> BackendFuture<'_, AnalyzerId>;

    /// `POST /api/va/{id}/set_config`: returns the normalized config.
    fn set_config<'a>(
        &'a self,
        id: &'a AnalyzerId,
        config: &'a AnalyzerConfig,
    ) -> BackendFuture<'a, AnalyzerConfig>;

    fn can_launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool>;

    fn launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool>;

    fn analyze<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool>;

    fn cancel<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool>;

    /// `POST /api/va/close`
    fn close<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool>;

    /// `GET /api/va/state`
    fn state(&self) -> BackendFuture<'_, StateResponse>;

    /// `POST /api/va/start` with the desired queue order.
    fn start<'a>(&'a self, queue: &'a [AnalyzerId]) -> BackendFuture<'a, QueueResponse>;

    /// `POST /api/va/stop`
    fn stop(&self) -> BackendFuture<'_, QueueResponse>;

    fn get_config<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerConfig>;

    fn get_status<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerStatus>;

    /// `GET /api/events`: open the push stream.
    fn events(&self) -> BackendFuture<'_, EventStream>;

    /// `POST /api/stop_events`: detach any previous push stream.
    fn stop_events(&self) -> BackendFuture<'_, ()>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// [`Backend`] over HTTP/JSON.
///
/// The per-request timeout is applied to each call rather than to the client
/// so that the long-lived event stream is not cut off.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| TransportError::Request {
                path: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        debug!(path, "Backend request");
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(path, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = self.send(path, request).await?;
        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                TransportError::Decode {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            } else {
                request_error(path, &e)
            }
        })
    }

    fn get_bool(&self, path: String) -> BackendFuture<'_, bool> {
        Box::pin(async move { self.call(&path, self.client.get(self.url(&path))).await })
    }

    fn post_bool(&self, path: String) -> BackendFuture<'_, bool> {
        Box::pin(async move { self.call(&path, self.client.post(self.url(&path))).await })
    }
}

fn request_error(path: &str, err: &reqwest::Error) -> TransportError {
    TransportError::Request {
        path: path.to_string(),
        message: err.to_string(),
    }
}

impl Backend for HttpBackend {
    fn ping(&self) -> BackendFuture<'_, bool> {
        self.get_bool("/ping".to_string())
    }

    fn init(&self) -> BackendFuture<'_, AnalyzerId> {
        Box::pin(async move {
            let path = "/api/va/init";
            let id: AnalyzerId = self.call(path, self.client.post(self.url(path))).await?;
            if !id.is_valid() {
                return Err(TransportError::Decode {
                    path: path.to_string(),
                    message: "backend returned a blank analyzer id".to_string(),
                });
            }
            Ok(id)
        })
    }

    fn set_config<'a>(
        &'a self,
        id: &'a AnalyzerId,
        config: &'a AnalyzerConfig,
    ) -> BackendFuture<'a, AnalyzerConfig> {
        Box::pin(async move {
            let path = format!("/api/va/{id}/set_config");
            let body = json!({ "config": config });
            self.call(&path, self.client.post(self.url(&path)).json(&body))
                .await
        })
    }

    fn can_launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        self.get_bool(format!("/api/va/{id}/can_launch"))
    }

    fn launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        self.post_bool(format!("/api/va/{id}/launch"))
    }

    fn analyze<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        self.post_bool(format!("/api/va/{id}/analyze"))
    }

    fn cancel<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        self.post_bool(format!("/api/va/{id}/cancel"))
    }

    fn close<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let path = "/api/va/close";
            let body = json!({ "id": id });
            self.call(path, self.client.post(self.url(path)).json(&body))
                .await
        })
    }

    fn state(&self) -> BackendFuture<'_, StateResponse> {
        Box::pin(async move {
            let path = "/api/va/state";
            self.call(path, self.client.get(self.url(path))).await
        })
    }

    fn start<'a>(&'a self, queue: &'a [AnalyzerId]) -> BackendFuture<'a, QueueResponse> {
        Box::pin(async move {
            let path = "/api/va/start";
            let body = json!({ "queue": queue });
            self.call(path, self.client.post(self.url(path)).json(&body))
                .await
        })
    }

    fn stop(&self) -> BackendFuture<'_, QueueResponse> {
        Box::pin(async move {
            let path = "/api/va/stop";
            self.call(path, self.client.post(self.url(path))).await
        })
    }

    fn get_config<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerConfig> {
        Box::pin(async move {
            let path = format!("/api/va/{id}/get_config");
            self.call(&path, self.client.get(self.url(&path))).await
        })
    }

    fn get_status<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerStatus> {
        Box::pin(async move {
            let path = format!("/api/va/{id}/status");
            self.call(&path, self.client.get(self.url(&path))).await
        })
    }

    fn events(&self) -> BackendFuture<'_, EventStream> {
        Box::pin(async move {
            let path = "/api/events";
            debug!(path, "Opening event stream");
            // No per-request timeout: the stream stays open indefinitely.
            let response = self
                .client
                .get(self.url(path))
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(|e| request_error(path, &e))?;
            if !response.status().is_success() {
                return Err(TransportError::Status {
                    path: path.to_string(),
                    status: response.status().as_u16(),
                });
            }
            info!("Event stream opened");
            Ok(frame_stream(response.bytes_stream()))
        })
    }

    fn stop_events(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let path = "/api/stop_events";
            self.send(path, self.client.post(self.url(path))).await?;
            Ok(())
        })
    }
}

/// Adapt a raw byte stream into decoded SSE frames.
///
/// The stream ends after the first read error.
pub fn frame_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(), VecDeque::new(), false);
    let frames = futures::stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, failed)| async move {
            if failed {
                return None;
            }
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (bytes, decoder, pending, false)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        let err = TransportError::Stream(e.to_string());
                        return Some((Err(err), (bytes, decoder, pending, true)));
                    }
                    None => return None,
                }
            }
        },
    );
    Box::pin(frames)
}
