//! HTTP status surface: liveness and daemon counters.

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::StatusConfig;
use crate::middleware::{self, RateLimiter};
use crate::stats::StatsSnapshot;
use crate::transport::Transport;

/// Shared state behind the status routes.
pub struct StatusState {
    pub transport: Transport,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub rate_limiter: RateLimiter,
    pub rate_limit_per_minute: u32,
}

impl StatusState {
    pub fn new(transport: Transport, rate_limit_per_minute: u32) -> Self {
        Self {
            transport,
            started_at: Utc::now(),
            started: Instant::now(),
            rate_limiter: RateLimiter::new(),
            rate_limit_per_minute,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_secs: u64,
    subscribers: usize,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(Extension(state): Extension<Arc<StatusState>>) -> Json<StatusReport> {
    Json(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_secs: state.started.elapsed().as_secs(),
        subscribers: state.transport.registry().len(),
        stats: state.transport.stats().snapshot(),
    })
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if allow_origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(allow_origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(allow_origin, error = %e, "invalid status.allow_origin, cross-origin requests disabled");
            layer
        }
    }
}

/// Builds the status router. `/status` needs a read-secret bearer token.
pub fn app(state: StatusState, config: &StatusConfig) -> Router {
    let protected = Router::new()
        .route("/status", get(status))
        .route_layer(axum::middleware::from_fn(middleware::read_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(cors_layer(&config.allow_origin))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::WriteGuard;
    use crate::stats::{DropReason, Stats};
    use crate::transport::TransportSettings;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use logd_db::{DbRuntimeSettings, SqliteStore};
    use logd_sign::Signer;
    use logd_types::STATUS_TOKEN;
    use std::net::SocketAddr;
    use std::time::{Duration, SystemTime};
    use tower::ServiceExt;

    async fn transport() -> Transport {
        let store = SqliteStore::open(":memory:", DbRuntimeSettings::default()).unwrap();
        Transport::bind(
            "127.0.0.1:0".parse().unwrap(),
            TransportSettings::new("r", "w"),
            Arc::new(store),
            Arc::new(WriteGuard::new(Duration::from_millis(200))),
            Arc::new(Stats::default()),
        )
        .await
        .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        let mut req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40_000))));
        req
    }

    fn get_authed(uri: &str, read_secret: &str) -> Request<Body> {
        let token = Signer::default().sign(read_secret.as_bytes(), STATUS_TOKEN, SystemTime::now());
        let mut req = get(uri);
        req.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", hex::encode(token))).unwrap(),
        );
        req
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = app(StatusState::new(transport().await, 10), &StatusConfig::default());

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let transport = transport().await;
        transport.stats().record_write();
        transport.stats().record_drop(DropReason::Unauthorized);
        transport
            .registry()
            .register(SocketAddr::from(([127, 0, 0, 1], 9)), tokio::time::Instant::now());

        let app = app(StatusState::new(transport, 10), &StatusConfig::default());
        let json = body_json(app.oneshot(get_authed("/status", "r")).await.unwrap()).await;

        assert_eq!(json["writes"], 1);
        assert_eq!(json["subscribers"], 1);
        assert_eq!(json["dropped"]["unauthorized"], 1);
        assert!(json["startedAt"].is_string());
        assert!(json.get("uptimeSecs").is_some());
    }

    #[tokio::test]
    async fn status_requires_read_token() {
        let app = app(StatusState::new(transport().await, 10), &StatusConfig::default());

        let anonymous = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let write_secret = app.clone().oneshot(get_authed("/status", "w")).await.unwrap();
        assert_eq!(write_secret.status(), StatusCode::UNAUTHORIZED);

        let mut garbage = get("/status");
        garbage
            .headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer zz"));
        let garbage = app.clone().oneshot(garbage).await.unwrap();
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);

        let stale = Signer::default().sign(
            b"r",
            STATUS_TOKEN,
            SystemTime::now() - Duration::from_secs(5),
        );
        let mut replayed = get("/status");
        replayed.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", hex::encode(stale))).unwrap(),
        );
        let replayed = app.clone().oneshot(replayed).await.unwrap();
        assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);

        let authed = app.clone().oneshot(get_authed("/status", "r")).await.unwrap();
        assert_eq!(authed.status(), StatusCode::OK);

        // Liveness stays open.
        let health = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_returns_429_with_retry_after() {
        let app = app(StatusState::new(transport().await, 2), &StatusConfig::default());

        for _ in 0..2 {
            let response = app.clone().oneshot(get("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let limited = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[header::RETRY_AFTER], "60");
    }

    #[tokio::test]
    async fn missing_connect_info_is_rejected() {
        let app = app(StatusState::new(transport().await, 10), &StatusConfig::default());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn configured_origin_is_echoed() {
        let config = StatusConfig {
            allow_origin: "https://logs.example.com".to_string(),
            ..StatusConfig::default()
        };
        let app = app(StatusState::new(transport().await, 10), &config);

        let mut req = get("/health");
        req.headers_mut().insert(
            header::ORIGIN,
            HeaderValue::from_static("https://logs.example.com"),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://logs.example.com"
        );
    }
}
