//! Session data model

use crate::frame_codec::DisplayFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a camera's video is obtained for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// One-shot upload of a pre-recorded clip
    UploadClip,
    /// Local live capture with a fixed-cadence loop
    LiveLocal,
    /// Remote live stream ingested through the push channel
    LiveRemote,
}

/// Static camera description. Immutable once created; the remote source
/// address is the only editable piece, and only while the session is idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub camera_id: String,
    pub name: String,
    pub mode: AcquisitionMode,
    /// Source address for live-remote mode (e.g. an RTSP URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_source: Option<String>,
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Acquiring,
    Active,
    Stopping,
    Failed,
}

/// User-supplied source clip awaiting submission
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// The most recent displayable artifact for a camera
#[derive(Debug, Clone)]
pub enum DisplayArtifact {
    /// An annotated frame from live acquisition
    Frame(DisplayFrame),
    /// A processed clip URL from upload mode
    ClipUrl(String),
}

/// Output description exposed to the display layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputDescriptor {
    Frame { decoded_at: DateTime<Utc> },
    Clip { url: String },
}

impl DisplayArtifact {
    pub fn describe(&self) -> OutputDescriptor {
        match self {
            DisplayArtifact::Frame(frame) => OutputDescriptor::Frame {
                decoded_at: frame.decoded_at,
            },
            DisplayArtifact::ClipUrl(url) => OutputDescriptor::Clip { url: url.clone() },
        }
    }
}

/// Read-only view of one session, safe to hand to the display layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub camera_id: String,
    pub name: String,
    pub mode: AcquisitionMode,
    pub lifecycle: Lifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_source: Option<String>,
    pub has_pending_input: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
