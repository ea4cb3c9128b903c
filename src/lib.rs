//! Invigil - Multi-Camera Exam Monitoring Orchestrator
//!
//! ## Architecture (7 Components)
//!
//! 1. SessionManager - Lifecycle state machine per camera session
//! 2. SessionRegistry - SSoT for session state and latest outputs
//! 3. CaptureLoop - Live-local fixed-cadence acquisition
//! 4. StreamChannel - Live-remote push ingestion
//! 5. AnnotationClient - Video processor communication adapter
//! 6. DisplayHub - SSE distribution to observers
//! 7. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - SSoT: SessionRegistry is the single source of truth
//! - One acquisition resource per camera, fenced by an epoch counter
//! - Failures surface once and sessions return to Idle; no silent retry

pub mod annotation_client;
pub mod capture_loop;
pub mod error;
pub mod frame_codec;
pub mod hub;
pub mod models;
pub mod session;
pub mod session_registry;
pub mod state;
pub mod stream_channel;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
