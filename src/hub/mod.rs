//! DisplayHub - Orchestrator Event Distribution
//!
//! ## Responsibilities
//!
//! - Observer connection management for the display layer
//! - Broadcasting lifecycle changes and frame-updated notifications
//! - Recording user-visible notices (one per session failure)
//!
//! Note: only frame update NOTIFICATIONS travel through the hub
//! (camera_id + timestamp). Actual image bytes are fetched via
//! HTTP GET /api/sessions/{camera_id}/output.jpg

use crate::session::types::Lifecycle;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Notices kept for late-joining observers
const NOTICE_BUFFER_CAP: usize = 100;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A session changed lifecycle state
    Session(SessionUpdateMessage),
    /// A camera's latest output was replaced; fetch bytes via HTTP
    FrameUpdated(FrameUpdatedMessage),
    /// User-visible notification (session failures etc.)
    Notice(NoticeMessage),
}

/// Session lifecycle update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdateMessage {
    pub camera_id: String,
    pub lifecycle: Lifecycle,
    pub timestamp: String,
}

/// Frame updated notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameUpdatedMessage {
    pub camera_id: String,
    pub timestamp: String,
}

/// User-visible notice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeMessage {
    pub camera_id: String,
    /// Stable error code (e.g. "ACQUISITION_DENIED")
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

/// Observer connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// DisplayHub instance
pub struct DisplayHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
    notices: RwLock<VecDeque<NoticeMessage>>,
}

impl DisplayHub {
    /// Create new DisplayHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            notices: RwLock::new(VecDeque::new()),
        }
    }

    /// Register a new observer
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = %id, "Observer connected");

        (id, rx)
    }

    /// Unregister an observer
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Observer disconnected");
        }
    }

    /// Broadcast a message to all observers
    pub async fn broadcast(&self, message: HubMessage) {
        if let HubMessage::Notice(notice) = &message {
            let mut notices = self.notices.write().await;
            if notices.len() >= NOTICE_BUFFER_CAP {
                notices.pop_front();
            }
            notices.push_back(notice.clone());
        }

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if conn.tx.send(json.clone()).is_err() {
                tracing::warn!(connection_id = %conn.id, "Failed to deliver hub message");
            }
        }
    }

    /// Recorded notices, oldest first
    pub async fn recent_notices(&self) -> Vec<NoticeMessage> {
        self.notices.read().await.iter().cloned().collect()
    }

    /// Get observer count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for DisplayHub {
    fn default() -> Self {
        Self::new()
    }
}
