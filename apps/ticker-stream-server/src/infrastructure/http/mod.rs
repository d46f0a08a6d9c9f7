//! Public HTTP API
//!
//! # Endpoints
//!
//! - `POST /api/searchCoinData` - Historical range query
//! - `GET /` and `GET /ws` - WebSocket upgrade for live subscribers
//!
//! CORS is permissive: the dashboard may be served from any origin.

mod response;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use response::{ApiResponse, COIN_NOT_FOUND, INTERNAL_ERROR, INVALID_REQUEST};

use crate::application::services::{QueryError, QueryService};
use crate::domain::search::SearchRequest;
use crate::infrastructure::broadcast::SharedBroadcastHub;

// =============================================================================
// State
// =============================================================================

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    query: Arc<QueryService>,
    hub: SharedBroadcastHub,
    shutdown: CancellationToken,
}

impl ApiState {
    /// Create API state.
    #[must_use]
    pub const fn new(
        query: Arc<QueryService>,
        hub: SharedBroadcastHub,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            query,
            hub,
            shutdown,
        }
    }
}

/// API routes over `state`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/searchCoinData", post(search_handler))
        .route("/", get(websocket::ws_handler))
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// API Server
// =============================================================================

/// Public API server.
pub struct ApiServer {
    listener: TcpListener,
    state: ApiState,
}

impl ApiServer {
    /// Bind the API server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiServerError::BindFailed`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr, state: ApiState) -> Result<Self, ApiServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(addr, e.to_string()))?;
        Ok(Self { listener, state })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns [`ApiServerError::ServerFailed`] if the socket has no address.
    pub fn local_addr(&self) -> Result<SocketAddr, ApiServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))
    }

    /// Serve until the state's shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ApiServerError::ServerFailed`] if the server stops abnormally.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let shutdown = self.state.shutdown.clone();
        let addr = self.local_addr()?;
        let app = router(self.state);

        tracing::info!(%addr, "API server listening");

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Handlers
// =============================================================================

async fn search_handler(
    State(state): State<ApiState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected search body");
            return response::invalid_request();
        }
    };

    match state.query.search(&request).await {
        Ok(records) => response::success(records),
        Err(QueryError::InvalidRequest(_)) => response::invalid_request(),
        Err(QueryError::NotFound(_)) => response::coin_not_found(),
        Err(QueryError::Store(_) | QueryError::Timeout(_)) => response::internal_error(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{MockIdentityStore, MockTickStore, StoreError};
    use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};

    fn state_with(identities: MockIdentityStore) -> ApiState {
        let query = QueryService::new(Arc::new(identities), Arc::new(MockTickStore::new()));
        ApiState::new(
            Arc::new(query),
            Arc::new(BroadcastHub::new(BroadcastConfig::default())),
            CancellationToken::new(),
        )
    }

    async fn post_search(state: ApiState, body: &str) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(
                Request::post("/api/searchCoinData")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (status, body) = post_search(state_with(MockIdentityStore::new()), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"status": 0, "errors": [INVALID_REQUEST]}));
    }

    #[tokio::test]
    async fn missing_coin_is_bad_request() {
        let (status, _) = post_search(
            state_with(MockIdentityStore::new()),
            r#"{"startDate":"2024-01-15T00:00:00Z","endDate":"2024-01-16T00:00:00Z"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_coin_is_not_found() {
        let mut identities = MockIdentityStore::new();
        identities.expect_find_identity().returning(|_| Ok(None));

        let (status, body) = post_search(
            state_with(identities),
            r#"{"startDate":"2024-01-15T00:00:00Z","endDate":"2024-01-16T00:00:00Z","coinName":"NOPE"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": 0, "data": {}, "errors": [COIN_NOT_FOUND]}));
    }

    #[tokio::test]
    async fn store_failure_is_internal_error() {
        let mut identities = MockIdentityStore::new();
        identities
            .expect_find_identity()
            .returning(|_| Err(StoreError::Backend("boom".to_string())));

        let (status, body) = post_search(
            state_with(identities),
            r#"{"startDate":1705276800000,"endDate":1705363200000,"coinName":"BTCUSDT"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"status": 0, "errors": [INTERNAL_ERROR]}));
    }
}
