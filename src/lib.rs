//! signup registers users with a profile image and lists them.

#![forbid(unsafe_code)]
pub mod crypto;
pub mod database;
pub mod error;
mod router;
pub mod storage;
pub mod telemetry;
pub mod user;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRef};
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::crypto::PasswordManager;
use crate::database::Database;
use crate::storage::AssetStorage;
use crate::user::UserService;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    content_type: Option<&str>,
    body: impl Into<axum::body::Body>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder().method(method).uri(path);
    if let Some(content_type) = content_type {
        request = request.header(header::CONTENT_TYPE, content_type);
    }

    app.oneshot(request.body(body.into()).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub users: UserService,
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> UserService {
        state.users.clone()
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Mark sensitive headers before the request span records them.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(state.config.server.timeout_secs),
        ))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    let uploads = ServeDir::new(state.users.storage().directory());
    let body_limit = DefaultBodyLimit::max(state.config.server.body_limit);

    Router::new()
        .route("/", get(router::diagnostics::home))
        .route("/debug", get(router::diagnostics::debug))
        .route("/zzz", get(router::diagnostics::zzz))
        .route("/testok", get(router::diagnostics::test_ok))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        // `GET /users` goes to `users`.
        .route("/users", get(router::users::handler))
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        .nest_service("/uploads", uploads)
        .layer(body_limit)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
///
/// Fails when the document store cannot be reached.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    let storage = AssetStorage::new(&config.storage.directory);
    storage.ensure_directory().await?;

    let db = Database::connect(&config.database).await?;
    let pwd = Arc::new(PasswordManager::new(Some(config.argon2.clone()))?);

    let users = UserService::new(db.users, storage, pwd)
        .cleanup_on_failure(config.storage.cleanup_on_failure);

    Ok(AppState {
        config,
        users,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[tokio::test]
    async fn test_initialize_state_creates_upload_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");

        let mut config = Configuration::default();
        config.database.url = "memory://".into();
        config.storage.directory = uploads.clone();
        config.argon2.memory_cost = 1024;
        config.argon2.iterations = 1;

        let state = initialize_state(Arc::new(config), None).await.unwrap();
        assert!(uploads.is_dir());
        assert!(state.users.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_state_unreachable_store() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Configuration::default();
        config.database.url = "mongodb://127.0.0.1:1/signup?serverSelectionTimeoutMS=200&connectTimeoutMS=200".into();
        config.storage.directory = dir.path().join("uploads");

        assert!(initialize_state(Arc::new(config), None).await.is_err());
    }

    /// Writer collecting formatted log lines.
    #[derive(Clone, Default)]
    struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_request_span_hides_credentials() {
        use tower::util::ServiceExt;

        let logs = Capture::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let request = axum::extract::Request::builder()
            .uri("/testok")
            .header(header::AUTHORIZATION, "Bearer s3cr3t-token")
            .header(header::COOKIE, "session=c00kie")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app(router::state(dir.path()))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        // Headers are recorded, values are not.
        assert!(logs.contains("authorization"));
        assert!(!logs.contains("s3cr3t-token"));
        assert!(!logs.contains("c00kie"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(router::state(dir.path()));

        let response =
            make_request(app, Method::GET, "/login", None, String::default()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_upload() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(router::state(dir.path()));

        let response = make_request(
            app,
            Method::GET,
            "/uploads/0-missing.png",
            None,
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
