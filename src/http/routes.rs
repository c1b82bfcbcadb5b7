//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{delete, get},
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::rooms::RoomError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::RoomSummary;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/rooms", get(list_rooms_handler))
        .route("/rooms/:id", delete(remove_room_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS from CLIENT_ORIGIN: "*" allows any origin, otherwise a comma-separated list
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(AllowOrigin::any());
    }

    let allowed_origins: Vec<header::HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    cors.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    rooms: usize,
    active_matches: usize,
    players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        rooms: state.registry.room_count(),
        active_matches: state.registry.active_matches(),
        players: state.registry.total_players(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

async fn list_rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.registry.summaries(),
    })
}

async fn remove_room_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.remove_room(&room_id, &auth.identity)?;
    info!(room_id = %room_id, by = %auth.identity, "Room removed over HTTP");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RoomNotFound => AppError::NotFound(err.to_string()),
            RoomError::Unauthorized => AppError::Forbidden(err.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{Config, MatchSettings};
    use crate::http::middleware::sign_token;
    use crate::util::time::unix_millis;
    use crate::ws::protocol::{GameType, NewRoom};

    const SECRET: &str = "route-secret";

    fn state() -> AppState {
        AppState::new(Config::for_tests(SECRET, MatchSettings::default()))
    }

    fn bearer(username: &str) -> String {
        let claims = json!({ "sub": username, "username": username, "exp": unix_millis() / 1000 + 600 });
        format!("Bearer {}", sign_token(&claims, SECRET))
    }

    fn add_room(state: &AppState, id: &str, owner: &str) {
        let request = NewRoom {
            id: Some(id.into()),
            name: id.into(),
            number_of_players: 2,
            type_of_game: GameType::Classic,
            goals_to_win: 1,
        };
        state.registry.create_room(request, owner).unwrap();
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_room_counts() {
        let state = state();
        add_room(&state, "r1", "ana");

        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 1);
        assert_eq!(body["active_matches"], 0);
    }

    #[tokio::test]
    async fn room_listing_requires_a_token() {
        let response = build_router(state())
            .oneshot(Request::get("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn room_listing_returns_summaries() {
        let state = state();
        add_room(&state, "b", "ana");
        add_room(&state, "a", "ana");

        let response = build_router(state)
            .oneshot(
                Request::get("/rooms")
                    .header("Authorization", bearer("ana"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let ids: Vec<&str> = body["rooms"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(body["rooms"][0]["status"], "waitingPlayers");
    }

    #[tokio::test]
    async fn only_the_owner_can_delete_a_room() {
        let state = state();
        add_room(&state, "r1", "ana");
        let router = build_router(state.clone());

        let delete_as = |user: &str| {
            Request::delete("/rooms/r1")
                .header("Authorization", bearer(user))
                .body(Body::empty())
                .unwrap()
        };

        let response = router.clone().oneshot(delete_as("bo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.registry.room_count(), 1);

        let response = router.clone().oneshot(delete_as("ana")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.registry.room_count(), 0);

        let response = router.oneshot(delete_as("ana")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "Room does not exist");
    }

    #[test]
    fn room_errors_map_to_http_statuses() {
        let status = |err: RoomError| AppError::from(err).into_response().status();
        assert_eq!(status(RoomError::RoomNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(RoomError::Unauthorized), StatusCode::FORBIDDEN);
        assert_eq!(status(RoomError::TeamFull), StatusCode::BAD_REQUEST);
    }
}
