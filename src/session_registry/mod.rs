//! SessionRegistry - Per-Camera Session State (SSoT)
//!
//! ## Responsibilities
//!
//! - Map camera identifier -> session state, created lazily on first
//!   command and never removed (sessions reset to Idle instead, so
//!   configuration survives stop/start cycles)
//! - Hold at most one acquisition resource per camera
//! - Serve read-only snapshots to the display layer
//!
//! Mutation goes through the session state machine only; the epoch field
//! fences off late events from superseded acquisitions.

use crate::capture_loop::CaptureHandle;
use crate::frame_codec::DisplayFrame;
use crate::session::types::{
    CameraDescriptor, DisplayArtifact, Lifecycle, SessionSnapshot, UploadSource,
};
use crate::stream_channel::StreamHandle;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The one active acquisition resource of a session
pub enum AcquisitionHandle {
    Capture(CaptureHandle),
    Stream(StreamHandle),
}

impl AcquisitionHandle {
    /// Tear the resource down. Idempotent in both variants; the stream
    /// variant also issues the best-effort remote stop-request.
    pub fn teardown(&self) {
        match self {
            AcquisitionHandle::Capture(handle) => handle.stop(),
            AcquisitionHandle::Stream(handle) => handle.close(),
        }
    }
}

/// Mutable per-camera session state
pub struct SessionEntry {
    pub descriptor: CameraDescriptor,
    pub lifecycle: Lifecycle,
    /// Bumped on every start and stop; events carrying an older epoch
    /// belong to a superseded acquisition and are discarded
    pub epoch: u64,
    pub latest_output: Option<DisplayArtifact>,
    pub pending_input: Option<UploadSource>,
    pub handle: Option<AcquisitionHandle>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionEntry {
    fn new(descriptor: CameraDescriptor) -> Self {
        Self {
            descriptor,
            lifecycle: Lifecycle::Idle,
            epoch: 0,
            latest_output: None,
            pending_input: None,
            handle: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            camera_id: self.descriptor.camera_id.clone(),
            name: self.descriptor.name.clone(),
            mode: self.descriptor.mode,
            lifecycle: self.lifecycle,
            remote_source: self.descriptor.remote_source.clone(),
            has_pending_input: self.pending_input.is_some(),
            output: self.latest_output.as_ref().map(|o| o.describe()),
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// SessionRegistry instance
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Create new SessionRegistry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create the entry for a camera if it does not exist yet. An existing
    /// entry keeps its state and configuration; the descriptor of the
    /// first registration wins.
    pub async fn ensure(&self, descriptor: CameraDescriptor) -> SessionSnapshot {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(descriptor.camera_id.clone())
            .or_insert_with(|| {
                tracing::info!(
                    camera_id = %descriptor.camera_id,
                    mode = ?descriptor.mode,
                    "Session created"
                );
                SessionEntry::new(descriptor)
            });
        entry.snapshot()
    }

    /// Run a mutation against one entry. Returns `None` when the camera
    /// has no session yet.
    pub async fn with_entry<R>(
        &self,
        camera_id: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.write().await;
        entries.get_mut(camera_id).map(f)
    }

    /// Snapshot of one session
    pub async fn snapshot(&self, camera_id: &str) -> Option<SessionSnapshot> {
        let entries = self.entries.read().await;
        entries.get(camera_id).map(|e| e.snapshot())
    }

    /// Snapshots of every session, ordered by camera id for stable display
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let entries = self.entries.read().await;
        let mut all: Vec<SessionSnapshot> = entries.values().map(|e| e.snapshot()).collect();
        all.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        all
    }

    /// Latest annotated frame bytes for a camera, if the current output
    /// is a frame
    pub async fn latest_frame_jpeg(&self, camera_id: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        match entries.get(camera_id)?.latest_output.as_ref()? {
            DisplayArtifact::Frame(frame) => Some(frame.jpeg.clone()),
            DisplayArtifact::ClipUrl(_) => None,
        }
    }

    /// Install a freshly decoded frame as the latest output
    /// (last-write-wins; recency is the only semantic that matters).
    ///
    /// Returns false - and drops the frame - when the epoch no longer
    /// matches or the session has left the acquiring/active states, so a
    /// stale acquisition can never resurface its output.
    pub async fn update_output(&self, camera_id: &str, epoch: u64, frame: DisplayFrame) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(camera_id) else {
            return false;
        };
        if entry.epoch != epoch
            || !matches!(entry.lifecycle, Lifecycle::Acquiring | Lifecycle::Active)
        {
            tracing::trace!(camera_id = %camera_id, "Discarding frame from superseded acquisition");
            return false;
        }
        // Replacing the option drops the previous frame's buffer
        entry.latest_output = Some(DisplayArtifact::Frame(frame));
        entry.touch();
        true
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::AcquisitionMode;

    fn descriptor(id: &str, mode: AcquisitionMode) -> CameraDescriptor {
        CameraDescriptor {
            camera_id: id.to_string(),
            name: format!("Camera {}", id),
            mode,
            remote_source: None,
        }
    }

    fn frame() -> DisplayFrame {
        DisplayFrame {
            jpeg: vec![0xFF, 0xD8, 0xFF],
            decoded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_lazy_creation_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.ensure(descriptor("1", AcquisitionMode::UploadClip)).await;

        // Second registration with a different mode does not clobber
        let snap = registry.ensure(descriptor("1", AcquisitionMode::LiveLocal)).await;
        assert_eq!(snap.mode, AcquisitionMode::UploadClip);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_output_requires_matching_epoch() {
        let registry = SessionRegistry::new();
        registry.ensure(descriptor("2", AcquisitionMode::LiveLocal)).await;

        registry
            .with_entry("2", |e| {
                e.epoch = 3;
                e.lifecycle = Lifecycle::Active;
            })
            .await
            .unwrap();

        assert!(!registry.update_output("2", 2, frame()).await);
        assert!(registry.update_output("2", 3, frame()).await);
        assert!(registry.latest_frame_jpeg("2").await.is_some());
    }

    #[tokio::test]
    async fn test_update_output_rejected_when_idle() {
        let registry = SessionRegistry::new();
        registry.ensure(descriptor("2", AcquisitionMode::LiveLocal)).await;

        assert!(!registry.update_output("2", 0, frame()).await);
        assert!(registry.latest_frame_jpeg("2").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshots_sorted_by_camera_id() {
        let registry = SessionRegistry::new();
        registry.ensure(descriptor("b", AcquisitionMode::LiveLocal)).await;
        registry.ensure(descriptor("a", AcquisitionMode::LiveRemote)).await;

        let snaps = registry.snapshots().await;
        assert_eq!(snaps[0].camera_id, "a");
        assert_eq!(snaps[1].camera_id, "b");
    }
}
