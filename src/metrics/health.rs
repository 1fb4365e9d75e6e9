//! HTTP server: health checks, Prometheus metrics, presence feed and admin
//!
//! Besides the health checks, the server is the service's inbound surface: a
//! platform gateway pushes voice-channel occupancy to
//! `PUT /servers/{id}/presence` and administrators issue commands through
//! `POST /servers/{id}/admin`.

use crate::admin::AdminCommand;
use crate::error::{error_kind, QueueError};
use crate::metrics::collector::MetricsCollector;
use crate::service::app::ServiceContext;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::types::{ChannelId, Presence, ServerId};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<Arc<ServiceContext>>,
}

/// Body of a presence update
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdate {
    /// Voice channel the snapshot is for; defaults to the server's queue channel
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub members: Vec<Presence>,
}

/// HTTP server for health checks, metrics and the inbound feeds
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service components the handlers operate on
    pub fn with_context(mut self, context: Arc<ServiceContext>) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid HTTP server address")?;

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/servers/{id}/status", get(status_handler))
            .route("/servers/{id}/presence", put(presence_handler))
            .route("/servers/{id}/admin", post(admin_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping HTTP server...");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to HTTP server: {}", e);
        }
        Ok(())
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Service not initialized" })),
    )
        .into_response()
}

/// Map a failed operation to an HTTP status by its error kind
fn error_response(error: &anyhow::Error) -> Response {
    let status = match error.downcast_ref::<QueueError>() {
        Some(QueueError::PermissionDenied { .. }) => StatusCode::FORBIDDEN,
        Some(
            QueueError::ServerNotFound { .. }
            | QueueError::ServerNotInitialized { .. }
            | QueueError::MemberNotFound { .. },
        ) => StatusCode::NOT_FOUND,
        Some(QueueError::AlreadyInitialized { .. }) => StatusCode::CONFLICT,
        Some(QueueError::InvalidChannelKind { .. } | QueueError::Validation { .. }) => {
            StatusCode::BAD_REQUEST
        }
        Some(err) if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {:#}", error);
    }

    (
        status,
        Json(json!({
            "error": error.to_string(),
            "kind": error_kind(error),
        })),
    )
        .into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "cuebot",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/servers/{id}/status",
            "/servers/{id}/presence",
            "/servers/{id}/admin"
        ]
    }))
}

/// Detailed health report
async fn health_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Health check requested");
    let Some(context) = &state.context else {
        return not_initialized();
    };

    match HealthCheck::check(context).await {
        Ok(report) => {
            let status = if report.status == HealthStatus::Unhealthy {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (status, Json(report)).into_response()
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
    }
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");
    match &state.context {
        Some(context) => match HealthCheck::readiness_check(context).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
            Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
            Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
            Err(e) => {
                error!("Readiness check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match &state.context {
        Some(context) => match HealthCheck::liveness_check(context).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match state.metrics_collector.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Server record, current session phase and the latest pass
async fn status_handler(
    State(state): State<HealthServerState>,
    Path(server_id): Path<ServerId>,
) -> Response {
    let Some(context) = &state.context else {
        return not_initialized();
    };

    let server = match context.repository().get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return error_response(&QueueError::ServerNotFound { server_id }.into()),
        Err(e) => return error_response(&e),
    };

    let reconciler = context.reconciler();
    let session = reconciler.schedule().evaluate(chrono::Utc::now());
    (
        StatusCode::OK,
        Json(json!({
            "server": server,
            "session": {
                "phase": session.phase,
                "active": session.active,
                "preamble": session.preamble,
            },
            "last_pass": reconciler.last_report(server_id),
        })),
    )
        .into_response()
}

/// Replace the occupancy snapshot of a queue channel and request a pass
async fn presence_handler(
    State(state): State<HealthServerState>,
    Path(server_id): Path<ServerId>,
    Json(update): Json<PresenceUpdate>,
) -> Response {
    let Some(context) = &state.context else {
        return not_initialized();
    };

    let channel = match update.channel_id {
        Some(channel) => channel,
        None => match context.repository().get_server(server_id).await {
            Ok(Some(server)) => match server.voice_channel {
                Some(channel) => channel,
                None => {
                    return error_response(
                        &QueueError::Validation {
                            server_id,
                            reason: "missing queue channel".to_string(),
                        }
                        .into(),
                    )
                }
            },
            Ok(None) => return error_response(&QueueError::ServerNotFound { server_id }.into()),
            Err(e) => return error_response(&e),
        },
    };

    let members = update.members.len();
    context
        .platform()
        .set_presence(server_id, channel, update.members);
    let requested = context.trigger().request(server_id);

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "server_id": server_id,
            "channel_id": channel,
            "members": members,
            "reconcile_requested": requested,
        })),
    )
        .into_response()
}

async fn admin_handler(
    State(state): State<HealthServerState>,
    Path(server_id): Path<ServerId>,
    Json(command): Json<AdminCommand>,
) -> Response {
    let Some(context) = &state.context else {
        return not_initialized();
    };

    match context.admin().execute(server_id, command).await {
        Ok(replies) => (StatusCode::OK, Json(json!({ "replies": replies }))).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::platform::{InMemoryPlatform, MembershipSource};
    use crate::service::AppState;
    use crate::storage::{InMemoryRepository, Repository};
    use crate::types::{Member, Server};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt; // for oneshot

    const ROOT: u64 = 1;

    async fn app() -> (AppState, Arc<InMemoryRepository>, Arc<InMemoryPlatform>) {
        let repo = Arc::new(InMemoryRepository::new());
        repo.upsert_member(Member::superuser(ROOT, "root#0001"))
            .await
            .unwrap();
        let platform = Arc::new(InMemoryPlatform::new());
        let state =
            AppState::with_components(AppConfig::default(), repo.clone(), platform.clone())
                .unwrap();
        (state, repo, platform)
    }

    fn router_for(state: &AppState) -> Router {
        let context = state.context();
        HealthServer::new(HealthServerConfig::default(), context.metrics())
            .with_context(context)
            .router()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), collector).router();

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        collector.update_health_status(2);
        let app = HealthServer::new(HealthServerConfig::default(), collector).router();

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_health_routes_without_context() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), collector).router();

        for uri in ["/health", "/ready", "/alive", "/servers/1/status"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_health_routes_before_start() {
        let (state, _repo, _platform) = app().await;
        let router = router_for(&state);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/alive").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_admin_commands_over_http() {
        let (state, repo, _platform) = app().await;
        let router = router_for(&state);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/servers/10/admin",
                json!({ "command": "init_server" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(repo.get_server(10).await.unwrap().is_some());

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/servers/10/admin",
                json!({ "command": "init_server" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/servers/10/admin",
                json!({ "command": "set_channel", "actor": 42, "kind": "queue", "channel": 100 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "permission_denied");

        let response = router
            .oneshot(json_request(
                "POST",
                "/servers/10/admin",
                json!({ "command": "set_channel", "actor": ROOT, "kind": "queue", "channel": 100 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["replies"][0], "Server queue channel set.");
    }

    #[tokio::test]
    async fn test_presence_feed() {
        let (state, repo, platform) = app().await;
        let router = router_for(&state);

        let members = json!([{ "id": 7, "name": "seven#0007", "display_name": "Seven" }]);

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/servers/10/presence",
                json!({ "members": members.clone() }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        repo.upsert_server(Server::new(10)).await.unwrap();
        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/servers/10/presence",
                json!({ "members": members.clone() }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(json_request(
                "PUT",
                "/servers/10/presence",
                json!({ "channel_id": 100, "members": members }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let present = platform.list_present_members(10, 100).await.unwrap();
        assert_eq!(present, vec![Presence::new(7, "seven#0007", "Seven")]);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (state, repo, _platform) = app().await;
        let router = router_for(&state);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/servers/10/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        repo.upsert_server(Server::new(10)).await.unwrap();
        let response = router
            .oneshot(Request::builder().uri("/servers/10/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["server"]["id"], 10);
        assert!(body["last_pass"].is_null());
    }
}
