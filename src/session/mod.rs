//! SessionManager - Monitoring Session State Machine
//!
//! ## Responsibilities
//!
//! - Drive each camera session through Idle -> Acquiring -> Active ->
//!   Stopping -> Idle, with Failed as the transient error state
//! - Dispatch start per acquisition mode (upload, live-local, live-remote)
//! - Enforce at most one acquisition resource per camera
//! - Fence late events from superseded acquisitions via the epoch counter
//! - Publish lifecycle changes, frame notifications and failure notices
//!   through the DisplayHub
//!
//! Transport failure is an implicit stop: the session reports the failure
//! once, returns to Idle and waits for an explicit restart.

pub mod types;

use crate::annotation_client::ProcessingBackend;
use crate::capture_loop::{self, CaptureProvider, FrameCallback};
use crate::error::{Error, Result};
use crate::hub::{
    DisplayHub, FrameUpdatedMessage, HubMessage, NoticeMessage, SessionUpdateMessage,
};
use crate::session_registry::{AcquisitionHandle, SessionRegistry};
use crate::stream_channel::{self, FailureCallback};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use self::types::{
    AcquisitionMode, CameraDescriptor, DisplayArtifact, Lifecycle, SessionSnapshot, UploadSource,
};

/// Per-mode work prepared under the registry lock during start
enum StartPlan {
    Upload(UploadSource),
    Local,
    Remote(String),
}

enum StopPlan {
    AlreadyIdle,
    Teardown {
        epoch: u64,
        handle: Option<AcquisitionHandle>,
    },
}

/// SessionManager instance
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn ProcessingBackend>,
    capture: Arc<dyn CaptureProvider>,
    hub: Arc<DisplayHub>,
    capture_interval: Duration,
    jpeg_quality: u8,
}

impl SessionManager {
    /// Create new SessionManager
    pub fn new(
        backend: Arc<dyn ProcessingBackend>,
        capture: Arc<dyn CaptureProvider>,
        hub: Arc<DisplayHub>,
        capture_interval: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            backend,
            capture,
            hub,
            capture_interval,
            jpeg_quality,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<DisplayHub> {
        &self.hub
    }

    /// Register a camera, creating its session lazily
    pub async fn register(&self, descriptor: CameraDescriptor) -> SessionSnapshot {
        self.registry.ensure(descriptor).await
    }

    /// Attach a clip for later submission. Upload mode only, idle only.
    pub async fn attach_upload(
        &self,
        camera_id: &str,
        source: UploadSource,
    ) -> Result<SessionSnapshot> {
        self.registry
            .with_entry(camera_id, |e| {
                if e.descriptor.mode != AcquisitionMode::UploadClip {
                    return Err(Error::Validation(
                        "Camera is not in upload mode".to_string(),
                    ));
                }
                if e.lifecycle != Lifecycle::Idle {
                    return Err(Error::Validation(
                        "Clip can only be replaced while idle".to_string(),
                    ));
                }
                // A new input invalidates the previous result
                e.latest_output = None;
                e.pending_input = Some(source);
                e.touch();
                Ok(e.snapshot())
            })
            .await
            .ok_or_else(|| no_session(camera_id))?
    }

    /// Change the remote source address. Live-remote mode only, idle only.
    pub async fn set_remote_source(
        &self,
        camera_id: &str,
        source_url: String,
    ) -> Result<SessionSnapshot> {
        self.registry
            .with_entry(camera_id, |e| {
                if e.descriptor.mode != AcquisitionMode::LiveRemote {
                    return Err(Error::Validation(
                        "Camera is not in live-remote mode".to_string(),
                    ));
                }
                if e.lifecycle != Lifecycle::Idle {
                    return Err(Error::Validation(
                        "Source can only change while idle".to_string(),
                    ));
                }
                e.descriptor.remote_source = Some(source_url);
                e.touch();
                Ok(e.snapshot())
            })
            .await
            .ok_or_else(|| no_session(camera_id))?
    }

    /// Start the session. Rejected unless the session is Idle; the attempt
    /// claims a fresh epoch so a concurrent stop supersedes it cleanly.
    pub async fn start(self: &Arc<Self>, camera_id: &str) -> Result<SessionSnapshot> {
        let (epoch, plan) = self
            .registry
            .with_entry(camera_id, |e| {
                if e.lifecycle != Lifecycle::Idle {
                    return Err(Error::Validation(format!(
                        "Session {} is not idle",
                        e.descriptor.camera_id
                    )));
                }
                let plan = match e.descriptor.mode {
                    AcquisitionMode::UploadClip => {
                        // Consumed here; a failed submission needs a fresh clip
                        let source = e.pending_input.take().ok_or_else(|| {
                            Error::Validation("No clip attached for upload".to_string())
                        })?;
                        StartPlan::Upload(source)
                    }
                    AcquisitionMode::LiveLocal => StartPlan::Local,
                    AcquisitionMode::LiveRemote => {
                        let url = e.descriptor.remote_source.clone().ok_or_else(|| {
                            Error::Validation("No remote source configured".to_string())
                        })?;
                        StartPlan::Remote(url)
                    }
                };
                e.epoch += 1;
                e.lifecycle = Lifecycle::Acquiring;
                e.last_error = None;
                e.touch();
                Ok((e.epoch, plan))
            })
            .await
            .ok_or_else(|| no_session(camera_id))??;

        tracing::info!(camera_id = %camera_id, epoch = epoch, "Session starting");
        self.publish_session(camera_id).await;

        match plan {
            StartPlan::Upload(source) => self.run_upload(camera_id, epoch, source).await?,
            StartPlan::Local => self.run_local(camera_id, epoch).await?,
            StartPlan::Remote(url) => self.run_remote(camera_id, epoch, url).await?,
        }

        self.registry
            .snapshot(camera_id)
            .await
            .ok_or_else(|| no_session(camera_id))
    }

    /// Stop the session. Idempotent; stopping an idle session is a no-op.
    /// Bumps the epoch first so in-flight frames and late acquisitions
    /// from the stopped attempt are discarded.
    pub async fn stop(&self, camera_id: &str) -> Result<SessionSnapshot> {
        let plan = self
            .registry
            .with_entry(camera_id, |e| {
                if e.lifecycle == Lifecycle::Idle {
                    return StopPlan::AlreadyIdle;
                }
                e.epoch += 1;
                e.lifecycle = Lifecycle::Stopping;
                if e.descriptor.mode == AcquisitionMode::LiveRemote {
                    // A stopped remote session must not display a stale frame
                    e.latest_output = None;
                }
                e.touch();
                StopPlan::Teardown {
                    epoch: e.epoch,
                    handle: e.handle.take(),
                }
            })
            .await
            .ok_or_else(|| no_session(camera_id))?;

        match plan {
            StopPlan::AlreadyIdle => {
                tracing::debug!(camera_id = %camera_id, "Stop on idle session is a no-op");
            }
            StopPlan::Teardown { epoch, handle } => {
                self.publish_session(camera_id).await;
                if let Some(handle) = handle {
                    handle.teardown();
                }
                self.registry
                    .with_entry(camera_id, |e| {
                        if e.epoch == epoch && e.lifecycle == Lifecycle::Stopping {
                            e.lifecycle = Lifecycle::Idle;
                            e.touch();
                        }
                    })
                    .await;
                self.publish_session(camera_id).await;
                tracing::info!(camera_id = %camera_id, "Session stopped");
            }
        }

        self.registry
            .snapshot(camera_id)
            .await
            .ok_or_else(|| no_session(camera_id))
    }

    async fn run_upload(&self, camera_id: &str, epoch: u64, source: UploadSource) -> Result<()> {
        match self
            .backend
            .submit_clip(camera_id, &source.file_name, source.data)
            .await
        {
            Ok(clip) => {
                let applied = self
                    .registry
                    .with_entry(camera_id, |e| {
                        if e.epoch != epoch || e.lifecycle != Lifecycle::Acquiring {
                            return false;
                        }
                        e.latest_output =
                            Some(DisplayArtifact::ClipUrl(cache_busted(&clip.url)));
                        // One-shot: the session is done once the result lands
                        e.lifecycle = Lifecycle::Idle;
                        e.touch();
                        true
                    })
                    .await
                    .unwrap_or(false);
                if applied {
                    self.publish_session(camera_id).await;
                } else {
                    tracing::debug!(
                        camera_id = %camera_id,
                        "Discarding clip result from superseded submission"
                    );
                }
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    Error::Submission(_) => e,
                    other => Error::Submission(other.to_string()),
                };
                self.fail_session(camera_id, epoch, &e).await;
                Err(e)
            }
        }
    }

    async fn run_local(self: &Arc<Self>, camera_id: &str, epoch: u64) -> Result<()> {
        let source = match self.capture.acquire().await {
            Ok(source) => source,
            Err(e) => {
                self.fail_session(camera_id, epoch, &e).await;
                return Err(e);
            }
        };

        let handle = capture_loop::spawn(
            camera_id.to_string(),
            source,
            self.capture_interval,
            self.jpeg_quality,
            self.backend.clone(),
            self.frame_callback(camera_id, epoch),
        );
        self.install_handle(camera_id, epoch, AcquisitionHandle::Capture(handle))
            .await;
        Ok(())
    }

    async fn run_remote(
        self: &Arc<Self>,
        camera_id: &str,
        epoch: u64,
        source_url: String,
    ) -> Result<()> {
        let mgr = self.clone();
        let failure_camera = camera_id.to_string();
        let on_failure: FailureCallback = Arc::new(move |err| {
            let mgr = mgr.clone();
            let camera_id = failure_camera.clone();
            Box::pin(async move {
                mgr.handle_transport_failure(&camera_id, epoch, err).await;
            })
        });

        match stream_channel::open(
            camera_id.to_string(),
            source_url,
            self.backend.clone(),
            self.frame_callback(camera_id, epoch),
            on_failure,
        )
        .await
        {
            Ok(handle) => {
                self.install_handle(camera_id, epoch, AcquisitionHandle::Stream(handle))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.fail_session(camera_id, epoch, &e).await;
                Err(e)
            }
        }
    }

    /// Install the acquired resource and flip the session to Active. When a
    /// stop already superseded this epoch, the resource is torn down instead
    /// (stop wins the race).
    async fn install_handle(&self, camera_id: &str, epoch: u64, handle: AcquisitionHandle) {
        let leftover = self
            .registry
            .with_entry(camera_id, |e| {
                if e.epoch == epoch && e.lifecycle == Lifecycle::Acquiring {
                    e.handle = Some(handle);
                    e.lifecycle = Lifecycle::Active;
                    e.touch();
                    None
                } else {
                    Some(handle)
                }
            })
            .await
            .flatten();

        match leftover {
            Some(handle) => {
                tracing::debug!(
                    camera_id = %camera_id,
                    "Discarding acquisition superseded by stop"
                );
                handle.teardown();
            }
            None => {
                tracing::info!(camera_id = %camera_id, "Session active");
                self.publish_session(camera_id).await;
            }
        }
    }

    /// Tear the session down after a mid-session channel loss. The stale
    /// output is cleared before the failure is reported.
    async fn handle_transport_failure(&self, camera_id: &str, epoch: u64, error: Error) {
        let handle = self
            .registry
            .with_entry(camera_id, |e| {
                if e.epoch != epoch
                    || !matches!(e.lifecycle, Lifecycle::Acquiring | Lifecycle::Active)
                {
                    return None;
                }
                // A dead channel has no output worth displaying
                e.latest_output = None;
                e.handle.take()
            })
            .await
            .flatten();

        if let Some(handle) = handle {
            handle.teardown();
        }
        self.fail_session(camera_id, epoch, &error).await;
    }

    /// Record the failure, surface it once, then return the session to
    /// Idle so it can be restarted explicitly.
    async fn fail_session(&self, camera_id: &str, epoch: u64, error: &Error) {
        let applied = self
            .registry
            .with_entry(camera_id, |e| {
                if e.epoch != epoch
                    || !matches!(e.lifecycle, Lifecycle::Acquiring | Lifecycle::Active)
                {
                    return false;
                }
                e.lifecycle = Lifecycle::Failed;
                e.last_error = Some(error.to_string());
                e.touch();
                true
            })
            .await
            .unwrap_or(false);

        if !applied {
            tracing::debug!(
                camera_id = %camera_id,
                error = %error,
                "Ignoring failure from superseded acquisition"
            );
            return;
        }

        tracing::warn!(camera_id = %camera_id, error = %error, "Session failed");
        self.publish_session(camera_id).await;
        self.hub
            .broadcast(HubMessage::Notice(NoticeMessage {
                camera_id: camera_id.to_string(),
                code: error.code().to_string(),
                message: error.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            }))
            .await;

        self.registry
            .with_entry(camera_id, |e| {
                if e.epoch == epoch && e.lifecycle == Lifecycle::Failed {
                    e.lifecycle = Lifecycle::Idle;
                    e.touch();
                }
            })
            .await;
        self.publish_session(camera_id).await;
    }

    /// Frame delivery callback bound to one acquisition epoch
    fn frame_callback(&self, camera_id: &str, epoch: u64) -> FrameCallback {
        let registry = self.registry.clone();
        let hub = self.hub.clone();
        let camera_id = camera_id.to_string();
        Arc::new(move |frame| {
            let registry = registry.clone();
            let hub = hub.clone();
            let camera_id = camera_id.clone();
            Box::pin(async move {
                if registry.update_output(&camera_id, epoch, frame).await {
                    hub.broadcast(HubMessage::FrameUpdated(FrameUpdatedMessage {
                        camera_id,
                        timestamp: Utc::now().to_rfc3339(),
                    }))
                    .await;
                }
            })
        })
    }

    async fn publish_session(&self, camera_id: &str) {
        if let Some(snap) = self.registry.snapshot(camera_id).await {
            self.hub
                .broadcast(HubMessage::Session(SessionUpdateMessage {
                    camera_id: snap.camera_id,
                    lifecycle: snap.lifecycle,
                    timestamp: Utc::now().to_rfc3339(),
                }))
                .await;
        }
    }
}

fn no_session(camera_id: &str) -> Error {
    Error::NotFound(format!("No session for camera {}", camera_id))
}

/// Append a cache-busting timestamp so the display layer never shows a
/// previously cached rendition of a re-processed clip.
fn cache_busted(url: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, sep, Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation_client::{FrameEventStream, ProcessedClip};
    use crate::capture_loop::{stub::StubFrameSource, FrameSource};
    use crate::frame_codec::{self, RawFrame};
    use async_trait::async_trait;
    use base64::Engine;
    use std::sync::atomic::{AtomicU64, Ordering};
    use super::types::OutputDescriptor;
    use tokio::sync::{mpsc, Mutex, Notify};

    enum SubmitBehavior {
        Url(String),
        Fail(String),
    }

    struct MockBackend {
        submit: SubmitBehavior,
        events: Mutex<Option<mpsc::UnboundedReceiver<crate::error::Result<String>>>>,
        submit_calls: AtomicU64,
        annotate_calls: AtomicU64,
        stop_calls: AtomicU64,
    }

    impl MockBackend {
        fn with_clip(url: &str) -> Arc<Self> {
            Arc::new(Self {
                submit: SubmitBehavior::Url(url.to_string()),
                events: Mutex::new(None),
                submit_calls: AtomicU64::new(0),
                annotate_calls: AtomicU64::new(0),
                stop_calls: AtomicU64::new(0),
            })
        }

        fn failing_submit(message: &str) -> Arc<Self> {
            Arc::new(Self {
                submit: SubmitBehavior::Fail(message.to_string()),
                events: Mutex::new(None),
                submit_calls: AtomicU64::new(0),
                annotate_calls: AtomicU64::new(0),
                stop_calls: AtomicU64::new(0),
            })
        }

        fn with_stream() -> (Arc<Self>, mpsc::UnboundedSender<crate::error::Result<String>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let backend = Arc::new(Self {
                submit: SubmitBehavior::Url(String::new()),
                events: Mutex::new(Some(rx)),
                submit_calls: AtomicU64::new(0),
                annotate_calls: AtomicU64::new(0),
                stop_calls: AtomicU64::new(0),
            });
            (backend, tx)
        }
    }

    #[async_trait]
    impl ProcessingBackend for MockBackend {
        async fn submit_clip(
            &self,
            _camera_id: &str,
            _file_name: &str,
            _data: Vec<u8>,
        ) -> Result<ProcessedClip> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            match &self.submit {
                SubmitBehavior::Url(url) => Ok(ProcessedClip { url: url.clone() }),
                SubmitBehavior::Fail(msg) => Err(Error::Submission(msg.clone())),
            }
        }

        async fn annotate_frame(&self, _camera_id: &str, jpeg: Vec<u8>) -> Result<Vec<u8>> {
            self.annotate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(jpeg)
        }

        async fn start_remote_stream(&self, _camera_id: &str, _source_url: &str) -> Result<()> {
            Ok(())
        }

        async fn open_stream(&self, _camera_id: &str) -> Result<FrameEventStream> {
            let rx = self
                .events
                .lock()
                .await
                .take()
                .expect("open_stream called twice");
            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(Box::pin(stream))
        }

        async fn stop_remote_stream(&self, _camera_id: &str) -> Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Provider that remembers the source it handed out
    struct TrackingProvider {
        deny: bool,
        last: Mutex<Option<Arc<StubFrameSource>>>,
    }

    impl TrackingProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deny: false,
                last: Mutex::new(None),
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                deny: true,
                last: Mutex::new(None),
            })
        }

        async fn last_source(&self) -> Arc<StubFrameSource> {
            self.last.lock().await.clone().expect("no source acquired")
        }
    }

    #[async_trait]
    impl CaptureProvider for TrackingProvider {
        async fn acquire(&self) -> Result<Arc<dyn FrameSource>> {
            if self.deny {
                return Err(Error::AcquisitionDenied(
                    "Camera permission refused".to_string(),
                ));
            }
            let source = Arc::new(StubFrameSource::new(16, 16));
            *self.last.lock().await = Some(source.clone());
            Ok(source)
        }
    }

    /// Provider whose acquire blocks until the test opens the gate
    struct GatedProvider {
        gate: Notify,
        inner: Arc<TrackingProvider>,
    }

    impl GatedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                inner: TrackingProvider::new(),
            })
        }
    }

    #[async_trait]
    impl CaptureProvider for GatedProvider {
        async fn acquire(&self) -> Result<Arc<dyn FrameSource>> {
            self.gate.notified().await;
            self.inner.acquire().await
        }
    }

    fn manager(
        backend: Arc<MockBackend>,
        capture: Arc<dyn CaptureProvider>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            backend,
            capture,
            Arc::new(DisplayHub::new()),
            Duration::from_millis(10),
            80,
        ))
    }

    fn descriptor(id: &str, mode: AcquisitionMode, remote: Option<&str>) -> CameraDescriptor {
        CameraDescriptor {
            camera_id: id.to_string(),
            name: format!("Camera {}", id),
            mode,
            remote_source: remote.map(|s| s.to_string()),
        }
    }

    fn valid_event() -> String {
        let jpeg = frame_codec::encode(
            &RawFrame {
                width: 8,
                height: 8,
                pixels: vec![0u8; 8 * 8 * 3],
            },
            80,
        )
        .unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);
        format!("{{\"image\": \"{}\"}}", b64)
    }

    #[tokio::test]
    async fn test_upload_scenario() {
        let backend = MockBackend::with_clip("http://processor/out/clip.mp4");
        let mgr = manager(backend.clone(), TrackingProvider::new());

        mgr.register(descriptor("exam-1", AcquisitionMode::UploadClip, None))
            .await;
        mgr.attach_upload(
            "exam-1",
            UploadSource {
                file_name: "exam.mp4".to_string(),
                data: vec![1, 2, 3],
            },
        )
        .await
        .unwrap();

        let snap = mgr.start("exam-1").await.unwrap();

        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(!snap.has_pending_input);
        match snap.output {
            Some(OutputDescriptor::Clip { url }) => {
                assert!(url.starts_with("http://processor/out/clip.mp4?t="));
            }
            other => panic!("expected clip output, got {:?}", other),
        }
        assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_without_clip_rejected() {
        let backend = MockBackend::with_clip("http://processor/out/clip.mp4");
        let mgr = manager(backend.clone(), TrackingProvider::new());

        mgr.register(descriptor("exam-1", AcquisitionMode::UploadClip, None))
            .await;

        let err = mgr.start("exam-1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let snap = mgr.registry().snapshot("exam-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_returns_to_idle_with_notice() {
        let backend = MockBackend::failing_submit("processor unavailable");
        let mgr = manager(backend, TrackingProvider::new());

        mgr.register(descriptor("exam-1", AcquisitionMode::UploadClip, None))
            .await;
        mgr.attach_upload(
            "exam-1",
            UploadSource {
                file_name: "exam.mp4".to_string(),
                data: vec![1, 2, 3],
            },
        )
        .await
        .unwrap();

        let err = mgr.start("exam-1").await.unwrap_err();
        assert!(matches!(err, Error::Submission(_)));

        let snap = mgr.registry().snapshot("exam-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(snap.last_error.is_some());

        let notices = mgr.hub().recent_notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].code, "SUBMISSION_FAILED");
    }

    #[tokio::test]
    async fn test_start_rejected_when_not_idle() {
        let backend = MockBackend::with_clip("");
        let mgr = manager(backend, TrackingProvider::new());

        mgr.register(descriptor("desk-1", AcquisitionMode::LiveLocal, None))
            .await;

        let snap = mgr.start("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Active);

        let err = mgr.start("desk-1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        mgr.stop("desk-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_acquisition_denied_records_notice() {
        let backend = MockBackend::with_clip("");
        let mgr = manager(backend.clone(), TrackingProvider::denying());

        mgr.register(descriptor("desk-1", AcquisitionMode::LiveLocal, None))
            .await;

        let err = mgr.start("desk-1").await.unwrap_err();
        assert!(matches!(err, Error::AcquisitionDenied(_)));

        let snap = mgr.registry().snapshot("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(snap.last_error.is_some());
        assert_eq!(backend.annotate_calls.load(Ordering::SeqCst), 0);

        let notices = mgr.hub().recent_notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].code, "ACQUISITION_DENIED");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_releases_source() {
        let backend = MockBackend::with_clip("");
        let provider = TrackingProvider::new();
        let mgr = manager(backend, provider.clone());

        mgr.register(descriptor("desk-1", AcquisitionMode::LiveLocal, None))
            .await;
        mgr.start("desk-1").await.unwrap();

        let snap = mgr.stop("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(provider.last_source().await.is_released());

        // Second stop is a no-op
        let snap = mgr.stop("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);

        // Unknown cameras are reported, not silently ignored
        let err = mgr.stop("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_during_acquiring_discards_late_source() {
        let backend = MockBackend::with_clip("");
        let provider = GatedProvider::new();
        let mgr = manager(backend, provider.clone());

        mgr.register(descriptor("desk-1", AcquisitionMode::LiveLocal, None))
            .await;

        let starter = mgr.clone();
        let start_task = tokio::spawn(async move { starter.start("desk-1").await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let snap = mgr.registry().snapshot("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Acquiring);

        let snap = mgr.stop("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);

        // The acquisition completes late and must be discarded
        provider.gate.notify_one();
        start_task.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = mgr.registry().snapshot("desk-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(provider.inner.last_source().await.is_released());
        assert!(mgr.registry().latest_frame_jpeg("desk-1").await.is_none());
    }

    #[tokio::test]
    async fn test_remote_midstream_failure_is_implicit_stop() {
        let (backend, tx) = MockBackend::with_stream();
        let mgr = manager(backend.clone(), TrackingProvider::new());
        let (_observer, mut rx) = mgr.hub().register().await;

        mgr.register(descriptor(
            "cctv-1",
            AcquisitionMode::LiveRemote,
            Some("rtsp://cam.example/stream"),
        ))
        .await;

        let snap = mgr.start("cctv-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Active);

        tx.send(Ok(valid_event())).unwrap();
        tx.send(Ok(valid_event())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.registry().latest_frame_jpeg("cctv-1").await.is_some());

        tx.send(Err(Error::TransportFailure("connection reset".to_string())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = mgr.registry().snapshot("cctv-1").await.unwrap();
        assert_eq!(snap.lifecycle, Lifecycle::Idle);
        assert!(snap.output.is_none());
        assert!(snap.last_error.as_deref().unwrap_or("").contains("reset"));

        // Implicit stop sent the remote stop-request exactly once
        assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 1);

        let notices = mgr.hub().recent_notices().await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].code, "TRANSPORT_FAILURE");

        // Both frames reached the display layer before the failure
        let mut frame_updates = 0;
        while let Ok(msg) = rx.try_recv() {
            if msg.contains("frame_updated") {
                frame_updates += 1;
            }
        }
        assert_eq!(frame_updates, 2);
    }
}
