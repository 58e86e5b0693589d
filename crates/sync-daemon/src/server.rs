//! HTTP surface of the partition server.
//!
//! - `GET  /api/tasks/user/{user_id}` returns the partition snapshot
//! - `POST /api/tasks/sync/{user_id}` merges a pushed delta, no response body
//! - `GET  /health` liveness probe
//!
//! Deltas travel as `application/octet-stream` bodies in the versioned wire
//! encoding from `tasksync_core::protocol`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tasksync_core::protocol::{decode_delta, encode_delta, CONTENT_TYPE, MAX_MESSAGE_SIZE};
use tasksync_core::{CodecError, UserId};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::partition::PartitionStore;

/// Shared application state.
#[derive(Default)]
pub struct AppState {
    pub partitions: PartitionStore,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build the router. Shared by the binary and the tests.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/tasks/user/{user_id}", get(fetch_snapshot))
        .route("/api/tasks/sync/{user_id}", post(push_delta))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn parse_user(raw: &str) -> ApiResult<UserId> {
    raw.parse().map_err(|e| {
        debug!("Rejected user id {:?}: {}", raw, e);
        (StatusCode::BAD_REQUEST, format!("Invalid user id: {}", e))
    })
}

async fn fetch_snapshot(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = parse_user(&user_id)?;
    let snapshot = state.partitions.snapshot(&user).await;

    let bytes = encode_delta(&snapshot).map_err(|e| {
        error!("Failed to encode snapshot for {}: {}", user, e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    debug!("GET snapshot for {} ({} bytes)", user, bytes.len());

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], bytes))
}

async fn push_delta(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let user = parse_user(&user_id)?;

    let delta = decode_delta(&body).map_err(|e| {
        warn!("Rejected push for {} ({} bytes): {}", user, body.len(), e);
        let status = match e {
            CodecError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, e.to_string())
    })?;

    let report = state.partitions.apply_delta(&user, &delta).await;
    debug!(
        "POST sync for {}: {} items, {} tombstones, {} changes",
        user,
        delta.items.len(),
        delta.deleted.len(),
        report.change_count()
    );

    Ok(StatusCode::OK)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tasksync_core::{Item, SyncDelta, Timestamp};
    use tower::ServiceExt;

    fn sample_delta() -> SyncDelta {
        SyncDelta {
            items: vec![Item::with_fields("x", "buy milk", false, Timestamp::from_millis(10))],
            ..SyncDelta::default()
        }
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(Arc::new(AppState::new()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"ok");
    }

    #[tokio::test]
    async fn test_push_then_fetch() {
        let state = Arc::new(AppState::new());
        let payload = encode_delta(&sample_delta()).unwrap();

        let response = router(Arc::clone(&state))
            .oneshot(
                Request::post("/api/tasks/sync/alice")
                    .header(header::CONTENT_TYPE, CONTENT_TYPE)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_bytes(response).await.is_empty());

        let response = router(state)
            .oneshot(
                Request::get("/api/tasks/user/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            CONTENT_TYPE
        );
        let snapshot = decode_delta(&body_bytes(response).await).unwrap();
        assert_eq!(snapshot, sample_delta());
    }

    #[tokio::test]
    async fn test_unknown_user_fetch_is_empty() {
        let response = router(Arc::new(AppState::new()))
            .oneshot(
                Request::get("/api/tasks/user/stranger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(decode_delta(&body_bytes(response).await).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_push_is_bad_request() {
        let state = Arc::new(AppState::new());
        let response = router(Arc::clone(&state))
            .oneshot(
                Request::post("/api/tasks/sync/alice")
                    .body(Body::from(vec![0xde, 0xad, 0xbe, 0xef]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.partitions.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_user_id_is_bad_request() {
        let response = router(Arc::new(AppState::new()))
            .oneshot(
                Request::get("/api/tasks/user/%20%20")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversize_push_is_rejected() {
        let response = router(Arc::new(AppState::new()))
            .oneshot(
                Request::post("/api/tasks/sync/alice")
                    .body(Body::from(vec![0u8; MAX_MESSAGE_SIZE + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
