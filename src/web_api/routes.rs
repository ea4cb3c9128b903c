//! API Routes

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::Error;
use crate::hub::DisplayHub;
use crate::models::ApiResponse;
use crate::session::types::{AcquisitionMode, CameraDescriptor, UploadSource};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    // Exam clips run well past the extractor's default body limit
    let max_upload = state.config.max_upload_bytes;

    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Sessions (read side)
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/output.jpg", get(session_output_jpeg))
        // Cameras (command side)
        .route("/api/cameras", post(register_camera))
        .route("/api/cameras/:id/source", put(set_remote_source))
        .route(
            "/api/cameras/:id/upload",
            post(upload_clip).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/api/cameras/:id/start", post(start_session))
        .route("/api/cameras/:id/stop", post(stop_session))
        // Event feed
        .route("/api/events", get(events_feed))
        .route("/api/events/notices", get(recent_notices))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterCameraRequest {
    camera_id: String,
    name: String,
    mode: AcquisitionMode,
    #[serde(default)]
    remote_source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetSourceRequest {
    source_url: String,
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.manager.registry().snapshots().await;
    Json(ApiResponse::success(sessions))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state
        .manager
        .registry()
        .snapshot(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("No session for camera {}", id)))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Latest annotated frame as raw JPEG bytes. 404 while the camera has no
/// frame output (never started, stopped remote, or clip-only session).
async fn session_output_jpeg(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let jpeg = state
        .manager
        .registry()
        .latest_frame_jpeg(&id)
        .await
        .ok_or_else(|| Error::NotFound(format!("No frame output for camera {}", id)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        jpeg,
    ))
}

async fn register_camera(
    State(state): State<AppState>,
    Json(req): Json<RegisterCameraRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.camera_id.trim().is_empty() {
        return Err(Error::Validation("camera_id must not be empty".to_string()));
    }

    let snapshot = state
        .manager
        .register(CameraDescriptor {
            camera_id: req.camera_id,
            name: req.name,
            mode: req.mode,
            remote_source: req.remote_source,
        })
        .await;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(snapshot))))
}

async fn set_remote_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetSourceRequest>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state.manager.set_remote_source(&id, req.source_url).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Attach a clip via multipart upload. The clip replaces any previously
/// attached one; submission happens on start.
async fn upload_clip(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Error> {
    let mut source: Option<UploadSource> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let file_name = field
            .file_name()
            .unwrap_or("upload.mp4")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read clip: {}", e)))?;
        source = Some(UploadSource {
            file_name,
            data: data.to_vec(),
        });
    }

    let source =
        source.ok_or_else(|| Error::Validation("Missing 'video' multipart field".to_string()))?;
    if source.data.is_empty() {
        return Err(Error::Validation("Uploaded clip is empty".to_string()));
    }

    let snapshot = state.manager.attach_upload(&id, source).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state.manager.start(&id).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let snapshot = state.manager.stop(&id).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn recent_notices(State(state): State<AppState>) -> impl IntoResponse {
    let notices = state.hub.recent_notices().await;
    Json(ApiResponse::success(notices))
}

/// Unregisters the hub connection when the SSE stream is dropped
struct FeedGuard {
    hub: Arc<DisplayHub>,
    conn_id: Uuid,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let conn_id = self.conn_id;
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                hub.unregister(&conn_id).await;
            });
        }
    }
}

/// SSE event feed. Every hub message goes out as one `data:` event.
async fn events_feed(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let (conn_id, rx) = state.hub.register().await;
    let guard = FeedGuard {
        hub: state.hub.clone(),
        conn_id,
    };

    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|msg| (Ok(SseEvent::default().data(msg)), (rx, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
