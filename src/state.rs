//! Application state
//!
//! Holds all shared components and state

use crate::annotation_client::HttpProcessingClient;
use crate::hub::DisplayHub;
use crate::session::SessionManager;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Video processor base URL
    pub processor_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Live-local sampling interval in milliseconds
    pub capture_interval_ms: u64,
    /// JPEG quality for outbound frames (1-100)
    pub jpeg_quality: u8,
    /// Upper bound on uploaded clip size in bytes
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            processor_url: std::env::var("PROCESSOR_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            capture_interval_ms: std::env::var("CAPTURE_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            jpeg_quality: std::env::var("JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(80),
            max_upload_bytes: std::env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(512)
                * 1024
                * 1024,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Video processor client (health check)
    pub backend: Arc<HttpProcessingClient>,
    /// SessionManager (lifecycle SSoT)
    pub manager: Arc<SessionManager>,
    /// DisplayHub (SSE event feed)
    pub hub: Arc<DisplayHub>,
}
