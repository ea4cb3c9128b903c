//! AnnotationClient - Processing Backend Adapter
//!
//! ## Responsibilities
//!
//! - Submit uploaded clips for one-shot processing
//! - Send single frames for synchronous annotation
//! - Start/stop remote stream processing and consume the per-camera
//!   push channel (server-sent events, one frame payload per event)
//!
//! The backend is an opaque collaborator; everything the orchestrator
//! needs from it sits behind the [`ProcessingBackend`] trait so session
//! logic can be exercised against in-process fakes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

/// One push-channel event payload (`data:` body), or a transport failure.
///
/// The stream ends after the first `Err` item; it is never resumed
/// automatically.
pub type FrameEventStream = Pin<Box<dyn futures::Stream<Item = Result<String>> + Send>>;

/// Reference to a processed clip artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedClip {
    pub url: String,
}

/// Remote processing collaborator, one instance shared by all sessions
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Submit a source clip for offline processing; resolves once the
    /// processed artifact is available.
    async fn submit_clip(
        &self,
        camera_id: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<ProcessedClip>;

    /// Send one encoded frame, receive one annotated frame synchronously.
    async fn annotate_frame(&self, camera_id: &str, jpeg: Vec<u8>) -> Result<Vec<u8>>;

    /// Initialize remote-stream processing for a camera. Must succeed
    /// before the push channel is opened.
    async fn start_remote_stream(&self, camera_id: &str, source_url: &str) -> Result<()>;

    /// Open the per-camera push channel. Requires a prior successful
    /// `start_remote_stream` for the same camera.
    async fn open_stream(&self, camera_id: &str) -> Result<FrameEventStream>;

    /// Best-effort remote stop; idempotent on the server side.
    async fn stop_remote_stream(&self, camera_id: &str) -> Result<()>;
}

/// HTTP implementation speaking to the detection/annotation server
pub struct HttpProcessingClient {
    client: reqwest::Client,
    /// Client without a total-request timeout, for the long-lived push channel
    stream_client: reqwest::Client,
    base_url: String,
}

/// Error payload shape returned by the processing server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Response of the clip submission endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessVideoResponse {
    processed_video_url: Option<String>,
}

impl HttpProcessingClient {
    /// Create a new client with the default 60s request timeout
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    /// Create a new client with a custom request timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        // Push channels stay open indefinitely; only bound the connect phase
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            stream_client,
            base_url,
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check processing server health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn error_message(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { error: Some(msg) }) => msg,
            _ => format!("HTTP {}", status),
        }
    }
}

#[async_trait]
impl ProcessingBackend for HttpProcessingClient {
    async fn submit_clip(
        &self,
        camera_id: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<ProcessedClip> {
        let url = format!("{}/api/process-video", self.base_url);

        let form = Form::new()
            .part(
                "video",
                Part::bytes(data)
                    .file_name(file_name.to_string())
                    .mime_str("video/mp4")?,
            )
            .text("cameraId", camera_id.to_string());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Submission(Self::error_message(resp).await));
        }

        let body: ProcessVideoResponse = resp.json().await?;
        match body.processed_video_url {
            Some(url) => Ok(ProcessedClip { url }),
            None => Err(Error::Submission(
                "No processed artifact URL returned".to_string(),
            )),
        }
    }

    async fn annotate_frame(&self, camera_id: &str, jpeg: Vec<u8>) -> Result<Vec<u8>> {
        let url = format!("{}/api/process-frame", self.base_url);

        let form = Form::new()
            .part(
                "frame",
                Part::bytes(jpeg)
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("cameraId", camera_id.to_string());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "Frame annotation failed: {}",
                resp.status()
            )));
        }

        Ok(resp.bytes().await?.to_vec())
    }

    async fn start_remote_stream(&self, camera_id: &str, source_url: &str) -> Result<()> {
        let url = format!("{}/api/start-cctv", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "camera_id": camera_id,
                "rtsp_url": source_url,
            }))
            .send()
            .await
            .map_err(|e| Error::InitializationFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::InitializationFailed(Self::error_message(resp).await));
        }

        tracing::info!(camera_id = %camera_id, "Remote stream processing started");
        Ok(())
    }

    async fn open_stream(&self, camera_id: &str) -> Result<FrameEventStream> {
        let url = format!("{}/api/cctv-stream/{}", self.base_url, camera_id);

        let resp = self
            .stream_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::InitializationFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::InitializationFailed(format!(
                "Push channel refused: {}",
                resp.status()
            )));
        }

        Ok(sse_event_stream(resp))
    }

    async fn stop_remote_stream(&self, camera_id: &str) -> Result<()> {
        let url = format!("{}/api/stop-cctv", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "camera_id": camera_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "Remote stop returned {}",
                resp.status()
            )));
        }

        tracing::debug!(camera_id = %camera_id, "Remote stream processing stopped");
        Ok(())
    }
}

/// Incremental parser for a `text/event-stream` body.
///
/// Only `data:` fields matter to the push channel; everything else
/// (comments, event names) is ignored.
#[derive(Default)]
struct SseParser {
    buf: String,
    ready: VecDeque<String>,
}

impl SseParser {
    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        // Events are separated by a blank line
        while let Some(idx) = self.buf.find("\n\n") {
            let raw: String = self.buf.drain(..idx + 2).collect();
            let mut data_lines = Vec::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }
            if !data_lines.is_empty() {
                self.ready.push_back(data_lines.join("\n"));
            }
        }
    }
}

/// Adapt a streaming HTTP response into a stream of event payloads.
///
/// A transport error yields one `Err` item and ends the stream; a clean
/// end-of-body simply ends it (the channel layer decides what that means).
fn sse_event_stream(resp: reqwest::Response) -> FrameEventStream {
    let bytes = resp.bytes_stream();
    let state = (bytes, SseParser::default(), false);

    Box::pin(futures::stream::unfold(
        state,
        |(mut bytes, mut parser, failed)| async move {
            if failed {
                return None;
            }
            loop {
                if let Some(event) = parser.ready.pop_front() {
                    return Some((Ok(event), (bytes, parser, false)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => parser.push_chunk(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(Error::TransportFailure(e.to_string())),
                            (bytes, parser, true),
                        ));
                    }
                    None => return None,
                }
            }
        },
    ))
}
