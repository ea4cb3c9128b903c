//! StreamChannel - Live-Remote Push Ingestion
//!
//! ## Responsibilities
//!
//! - Initialize remote processing, then consume the per-camera push channel
//! - Decode inbound frame events; drop malformed ones without failing
//! - Detect transport failure and report it exactly once, then terminate
//!   (no automatic reconnection - surfacing failure beats masking a stale
//!   remote session)
//! - Idempotent close, always paired with a best-effort remote stop-request

use crate::annotation_client::ProcessingBackend;
use crate::capture_loop::FrameCallback;
use crate::error::{Error, Result};
use crate::frame_codec;
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Invoked exactly once when the channel fails mid-session. The caller
/// treats this as an implicit stop, not a retry.
pub type FailureCallback = Arc<dyn Fn(Error) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to an open ingestion channel
pub struct StreamHandle {
    camera_id: String,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
    backend: Arc<dyn ProcessingBackend>,
}

impl StreamHandle {
    /// Close the channel. Idempotent. Sends the remote stop-request on the
    /// first call so server-held resources are released even when the
    /// local channel already failed; local teardown is immediate.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();

        let backend = self.backend.clone();
        let camera_id = self.camera_id.clone();
        // Remote stop is best-effort; skip it when no runtime is left
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                if let Err(e) = backend.stop_remote_stream(&camera_id).await {
                    tracing::warn!(
                        camera_id = %camera_id,
                        error = %e,
                        "Best-effort remote stop failed"
                    );
                }
            });
        }

        tracing::info!(camera_id = %self.camera_id, "Ingestion channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the ingestion channel for one camera.
///
/// Issues the remote start-request first; if the remote side rejects it
/// the error propagates as `InitializationFailed` and no channel exists.
pub async fn open(
    camera_id: String,
    source_url: String,
    backend: Arc<dyn ProcessingBackend>,
    on_frame: FrameCallback,
    on_failure: FailureCallback,
) -> Result<StreamHandle> {
    backend
        .start_remote_stream(&camera_id, &source_url)
        .await
        .map_err(as_init_failure)?;

    let mut events = backend
        .open_stream(&camera_id)
        .await
        .map_err(as_init_failure)?;

    let closed = Arc::new(AtomicBool::new(false));
    let failure_fired = Arc::new(AtomicBool::new(false));

    let task_camera_id = camera_id.clone();
    let task = tokio::spawn(async move {
        loop {
            match events.next().await {
                Some(Ok(data)) => match frame_codec::decode_event(&data) {
                    Ok(frame) => on_frame(frame).await,
                    Err(e) => {
                        tracing::debug!(
                            camera_id = %task_camera_id,
                            error = %e,
                            "Dropping malformed frame event"
                        );
                    }
                },
                Some(Err(e)) => {
                    fire_failure(&task_camera_id, &failure_fired, &on_failure, e);
                    break;
                }
                None => {
                    // Remote closed the connection without an error frame
                    fire_failure(
                        &task_camera_id,
                        &failure_fired,
                        &on_failure,
                        Error::TransportFailure("Push channel closed by remote".to_string()),
                    );
                    break;
                }
            }
        }
    });

    tracing::info!(camera_id = %camera_id, "Ingestion channel opened");

    Ok(StreamHandle {
        camera_id,
        closed,
        task,
        backend,
    })
}

fn as_init_failure(e: Error) -> Error {
    match e {
        Error::InitializationFailed(_) => e,
        other => Error::InitializationFailed(other.to_string()),
    }
}

fn fire_failure(camera_id: &str, fired: &AtomicBool, on_failure: &FailureCallback, error: Error) {
    if fired.swap(true, Ordering::SeqCst) {
        return;
    }
    tracing::warn!(camera_id = %camera_id, error = %error, "Ingestion channel failed");
    // Detached so the handler may tear this very task down (close aborts
    // the consumer) without cancelling itself
    tokio::spawn(on_failure(error));
}
