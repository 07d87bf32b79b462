//! Tally Web Server
//!
//! Axum-based REST API for the Tally statement ingestion pipeline.
//!
//! Security features:
//! - Bearer tokens checked against the identity service (use --no-auth for local dev)
//! - Restrictive CORS policy
//! - Input validation (file type and size limits)
//! - Sanitized error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use tally_core::db::Database;
use tally_core::{
    BatchOrchestrator, ClassifierClient, IdentityClient, ParserFactory, Publisher, ServiceConfig,
};

mod handlers;

/// Maximum size of a single uploaded file (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum size of a whole upload request
pub const MAX_REQUEST_SIZE: usize = 5 * MAX_UPLOAD_SIZE;

/// Caller id header, trusted only when tokens are not being validated
pub const USER_ID_HEADER: &str = "x-user-id";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only in production)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    pub orchestrator: BatchOrchestrator,
    pub parsers: ParserFactory,
    /// Token validation; `None` falls back to the user id header
    pub identity: Option<IdentityClient>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: ServerConfig,
        orchestrator: BatchOrchestrator,
        identity: Option<IdentityClient>,
    ) -> Self {
        Self {
            db,
            config,
            orchestrator,
            parsers: ParserFactory::new(),
            identity,
        }
    }
}

/// The caller a request is acting for
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Authentication middleware - resolves the caller's user id
///
/// With an identity service configured and auth required, the request must
/// carry `Authorization: Bearer <token>`; the token is validated remotely and
/// the returned user id is used. Otherwise the `X-User-Id` header is taken
/// as-is, which is only safe for local development or behind a gateway that
/// sets it.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let user = match (&state.identity, state.config.require_auth) {
        (Some(identity), true) => {
            let token = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());

            let Some(token) = token else {
                warn!(path = %path, "Unauthorized request - no bearer token");
                return AppError::unauthorized("Could not validate credentials").into_response();
            };

            match identity.validate_token(&token).await {
                Ok(Some(user_id)) => {
                    debug!(user_id = %user_id, path = %path, "Authenticated via identity service");
                    user_id
                }
                Ok(None) => {
                    warn!(path = %path, "Unauthorized request - token rejected");
                    return AppError::unauthorized("Could not validate credentials").into_response();
                }
                Err(e) => {
                    error!(error = %e, path = %path, "Identity service call failed");
                    return AppError::service_unavailable("Authentication service unavailable")
                        .into_response();
                }
            }
        }
        _ => match user_id_header(request.headers()) {
            Some(user_id) => user_id,
            None => {
                warn!(path = %path, "Unauthorized request - no user id");
                return AppError::unauthorized("Authentication required").into_response();
            }
        },
    };

    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

/// Read the caller id from the `X-User-Id` header
pub fn user_id_header(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let state = Arc::new(state);

    let api_routes = Router::new()
        .route(
            "/v1/transactions/upload",
            post(handlers::upload_transactions).layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE)),
        )
        .route(
            "/v1/transactions/batch/:batch_id",
            get(handlers::get_batch_status),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Build CORS layer
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        ))
}

/// Start the server with the resolved service configuration
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    service: &ServiceConfig,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("⚠️  Authentication disabled - do not expose to network!");
    }

    // No task from a previous process can still be driving these
    match db.recover_stuck_batches(Duration::ZERO) {
        Ok(count) if count > 0 => {
            warn!(
                "⚠️  Recovered {} stuck batch(es) from previous server session",
                count
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover stuck batches: {}", e);
        }
    }

    let parsers = ParserFactory::new();
    db.seed_banks(parsers.supported_codes())?;

    let classifier = ClassifierClient::from_config(&service.classifier);
    classifier.warm_up().await;
    let classifier_status = tally_core::Classifier::status(&classifier);
    info!(
        mode = classifier_status.mode,
        ready = classifier_status.ready,
        "Classifier initialized"
    );

    let publisher = Publisher::from_config(&service.broker)?;
    if let Publisher::RabbitMq(rabbit) = &publisher {
        match rabbit.declare_queue().await {
            Ok(()) => info!(queue = rabbit.queue_name(), "✅ Event queue declared"),
            Err(e) => warn!(
                queue = rabbit.queue_name(),
                error = %e,
                "⚠️  Could not declare event queue; events may be unrouted"
            ),
        }
    } else {
        info!("ℹ️  Message broker not configured (set RABBITMQ_HOST to publish batch events)");
    }

    let identity = IdentityClient::from_config(&service.identity)?;
    match &identity {
        Some(client) => info!(url = client.base_url(), "Identity service configured"),
        None => info!("ℹ️  Identity service not configured, trusting the {} header", USER_ID_HEADER),
    }

    let orchestrator = BatchOrchestrator::new(db.clone(), Arc::new(classifier), Arc::new(publisher))
        .with_chunk_size(service.pipeline.chunk_size);

    let app = create_router(AppState::new(db, config, orchestrator, identity));
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    /// Extra top-level fields merged into the JSON body
    details: Option<serde_json::Map<String, serde_json::Value>>,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn with_status(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            details: None,
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, msg)
    }

    pub fn payload_too_large(msg: &str) -> Self {
        Self::with_status(StatusCode::PAYLOAD_TOO_LARGE, msg)
    }

    pub fn service_unavailable(msg: &str) -> Self {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, msg)
    }

    pub fn conflict(msg: &str, details: serde_json::Value) -> Self {
        Self {
            details: match details {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            },
            ..Self::with_status(StatusCode::CONFLICT, msg)
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Map a pipeline error to the status the caller should see
    pub fn from_core(err: tally_core::Error) -> Self {
        match err {
            tally_core::Error::DuplicateFile {
                ref filename,
                ref batch_id,
                uploaded_at,
            } => Self::conflict(
                &err.to_string(),
                serde_json::json!({
                    "batch_id": batch_id,
                    "upload_date": uploaded_at.to_rfc3339(),
                    "filename": filename,
                }),
            ),
            tally_core::Error::NotFound(ref what) => Self::not_found(what),
            ref e if e.is_input_error() => Self::bad_request(&e.to_string()),
            other => other.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let mut body = self.details.unwrap_or_default();
        body.insert("error".to_string(), serde_json::Value::String(self.message));

        (self.status, Json(serde_json::Value::Object(body))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            details: None,
            // Keep full error for logging
            internal: Some(err),
        }
    }
}
