//! Test utilities for tally-core
//!
//! In-process stand-ins for the services the pipeline talks to: a RabbitMQ
//! management API that records published messages, and an identity service
//! with a fixed token table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::events::BatchEvent;

/// Serve `app` on an ephemeral port until the returned sender fires
async fn spawn_server(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

/// A message as the broker received it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishedMessage {
    pub vhost: String,
    pub routing_key: String,
    pub payload: String,
    pub properties: Value,
}

impl PublishedMessage {
    /// Decode the payload as a batch event
    pub fn event(&self) -> Option<BatchEvent> {
        serde_json::from_str(&self.payload).ok()
    }
}

#[derive(Default)]
struct BrokerState {
    messages: Mutex<Vec<PublishedMessage>>,
    queues: Mutex<Vec<(String, Value)>>,
    /// Queue names that exist; publishing to anything else is unrouted
    known_queues: Mutex<Vec<String>>,
    fail_with: Mutex<Option<StatusCode>>,
}

/// Mock RabbitMQ management API
pub struct MockBrokerServer {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockBrokerServer {
    /// Start the mock broker with `queues` already declared
    pub async fn start(queues: &[&str]) -> Self {
        let state = Arc::new(BrokerState::default());
        if let Ok(mut known) = state.known_queues.lock() {
            known.extend(queues.iter().map(|q| q.to_string()));
        }

        let app = Router::new()
            .route(
                "/api/exchanges/:vhost/amq.default/publish",
                post(handle_publish),
            )
            .route("/api/queues/:vhost/:queue", put(handle_declare))
            .with_state(state.clone());

        let (addr, shutdown_tx) = spawn_server(app).await;

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Everything published so far
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state
            .messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Queues declared through the API, with their declaration bodies
    pub fn declared_queues(&self) -> Vec<(String, Value)> {
        self.state
            .queues
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    /// Answer every publish with `status` (None restores normal behavior)
    pub fn fail_with(&self, status: Option<StatusCode>) {
        if let Ok(mut fail) = self.state.fail_with.lock() {
            *fail = status;
        }
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockBrokerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Deserialize)]
struct PublishBody {
    routing_key: String,
    payload: String,
    #[serde(default)]
    properties: Value,
}

async fn handle_publish(
    State(state): State<Arc<BrokerState>>,
    Path(vhost): Path<String>,
    Json(body): Json<PublishBody>,
) -> (StatusCode, Json<Value>) {
    if let Some(status) = state.fail_with.lock().ok().and_then(|f| *f) {
        return (status, Json(json!({"error": "mock failure"})));
    }

    let routed = state
        .known_queues
        .lock()
        .map(|known| known.contains(&body.routing_key))
        .unwrap_or(false);

    if routed {
        if let Ok(mut messages) = state.messages.lock() {
            messages.push(PublishedMessage {
                vhost,
                routing_key: body.routing_key,
                payload: body.payload,
                properties: body.properties,
            });
        }
    }

    (StatusCode::OK, Json(json!({ "routed": routed })))
}

async fn handle_declare(
    State(state): State<Arc<BrokerState>>,
    Path((_vhost, queue)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Ok(mut known) = state.known_queues.lock() {
        if !known.contains(&queue) {
            known.push(queue.clone());
        }
    }
    if let Ok(mut queues) = state.queues.lock() {
        queues.push((queue, body));
    }
    StatusCode::CREATED
}

#[derive(Default)]
struct IdentityState {
    tokens: Mutex<HashMap<String, Value>>,
    fail_with: Mutex<Option<StatusCode>>,
}

/// Mock identity service
///
/// Tokens registered with [`MockIdentityServer::active`] validate to their
/// user id; [`MockIdentityServer::revoked`] tokens validate but are revoked;
/// everything else is invalid.
pub struct MockIdentityServer {
    addr: SocketAddr,
    state: Arc<IdentityState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockIdentityServer {
    pub async fn start() -> Self {
        let state = Arc::new(IdentityState::default());

        let app = Router::new()
            .route("/auth/validate", get(handle_validate))
            .with_state(state.clone());

        let (addr, shutdown_tx) = spawn_server(app).await;

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Register a token belonging to an active user
    pub fn active(&self, token: &str, user_id: &str) {
        self.insert(
            token,
            json!({"valid": true, "revoked": false, "status": "active", "userId": user_id}),
        );
    }

    /// Register a token that has been revoked
    pub fn revoked(&self, token: &str, user_id: &str) {
        self.insert(
            token,
            json!({"valid": true, "revoked": true, "status": "active", "userId": user_id}),
        );
    }

    /// Answer every validation with `status` (None restores normal behavior)
    pub fn fail_with(&self, status: Option<StatusCode>) {
        if let Ok(mut fail) = self.state.fail_with.lock() {
            *fail = status;
        }
    }

    fn insert(&self, token: &str, response: Value) {
        if let Ok(mut tokens) = self.state.tokens.lock() {
            tokens.insert(token.to_string(), response);
        }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockIdentityServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_validate(
    State(state): State<Arc<IdentityState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if let Some(status) = state.fail_with.lock().ok().and_then(|f| *f) {
        return (status, Json(json!({"detail": "mock failure"})));
    }

    let response = params
        .get("token")
        .and_then(|token| state.tokens.lock().ok()?.get(token).cloned())
        .unwrap_or_else(|| json!({"valid": false}));
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPublisher, RabbitMqPublisher};
    use crate::identity::IdentityClient;
    use std::time::Duration;

    fn publisher(server: &MockBrokerServer, queue: &str) -> RabbitMqPublisher {
        RabbitMqPublisher::new(
            &server.url(),
            "guest",
            "guest",
            "/",
            queue,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_mock_broker() {
        let server = MockBrokerServer::start(&["batch_processed"]).await;
        let p = publisher(&server, "batch_processed");

        p.publish_batch_processed(&BatchEvent::completed("b1", "u1"))
            .await
            .unwrap();

        let messages = server.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].vhost, "/");
        assert_eq!(messages[0].routing_key, "batch_processed");
        assert_eq!(messages[0].properties["delivery_mode"], 2);
        assert_eq!(messages[0].event(), Some(BatchEvent::completed("b1", "u1")));
    }

    #[tokio::test]
    async fn test_unrouted_publish_is_error() {
        let server = MockBrokerServer::start(&[]).await;
        let p = publisher(&server, "batch_processed");
        assert!(p
            .publish_batch_processed(&BatchEvent::completed("b1", "u1"))
            .await
            .is_err());

        // Declaring the queue makes the next publish routable
        p.declare_queue().await.unwrap();
        assert_eq!(server.declared_queues()[0].1["durable"], true);
        p.publish_batch_processed(&BatchEvent::completed("b1", "u1"))
            .await
            .unwrap();
        assert_eq!(server.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_error_status() {
        let server = MockBrokerServer::start(&["batch_processed"]).await;
        server.fail_with(Some(StatusCode::SERVICE_UNAVAILABLE));
        let p = publisher(&server, "batch_processed");
        assert!(p
            .publish_batch_processed(&BatchEvent::failed("b1", "u1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_identity_validation() {
        let server = MockIdentityServer::start().await;
        let user = "7f1c2f0e-2d3a-4b8e-9a51-0c9d8e7f6a5b";
        server.active("good", user);
        server.revoked("old", user);

        let client = IdentityClient::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert_eq!(
            client.validate_token("good").await.unwrap().as_deref(),
            Some(user)
        );
        assert!(client.validate_token("old").await.unwrap().is_none());
        assert!(client.validate_token("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_malformed_user_id_is_rejected() {
        let server = MockIdentityServer::start().await;
        server.active("t", "not-a-uuid");
        let client = IdentityClient::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert!(client.validate_token("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_status_mapping() {
        let server = MockIdentityServer::start().await;
        server.active("good", "7f1c2f0e-2d3a-4b8e-9a51-0c9d8e7f6a5b");
        let client = IdentityClient::new(&server.url(), Duration::from_secs(2)).unwrap();

        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            server.fail_with(Some(status));
            assert!(client.validate_token("good").await.unwrap().is_none());
        }

        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY] {
            server.fail_with(Some(status));
            assert!(client.validate_token("good").await.is_err());
        }

        server.fail_with(None);
        assert!(client.validate_token("good").await.unwrap().is_some());
    }
}
