//! RabbitMQ publisher over the management HTTP API
//!
//! Messages go through the default exchange with the queue name as routing
//! key, marked persistent. The queue itself is declared durable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BatchEvent, EventPublisher};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// AMQP delivery mode for messages that survive a broker restart
const PERSISTENT: u8 = 2;

#[derive(Serialize)]
struct PublishRequest<'a> {
    properties: MessageProperties,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Serialize)]
struct MessageProperties {
    delivery_mode: u8,
    content_type: &'static str,
}

#[derive(Deserialize)]
struct PublishResponse {
    routed: bool,
}

#[derive(Serialize)]
struct DeclareQueueRequest {
    durable: bool,
    auto_delete: bool,
}

#[derive(Clone)]
pub struct RabbitMqPublisher {
    http_client: Client,
    base_url: Url,
    username: String,
    password: String,
    vhost: String,
    queue_name: String,
}

impl RabbitMqPublisher {
    /// Create a publisher for `base_url` (scheme, host and management port)
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        vhost: &str,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid broker URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("Invalid broker URL '{}'", base_url)));
        }

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            vhost: vhost.to_string(),
            queue_name: queue_name.to_string(),
        })
    }

    /// Build from config; `None` when no broker host is set
    pub fn from_config(config: &BrokerConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url() else {
            return Ok(None);
        };
        Self::new(
            &base_url,
            &config.username,
            &config.password,
            &config.vhost,
            &config.queue_name,
            config.timeout(),
        )
        .map(Some)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// `{base}/api/{segments...}` with every segment percent-encoded
    ///
    /// The default vhost is `/`, which must travel as `%2F`.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    /// Declare the destination queue as durable (idempotent on the broker side)
    pub async fn declare_queue(&self) -> Result<()> {
        let url = self.endpoint(&["queues", &self.vhost, &self.queue_name]);
        let response = self
            .http_client
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&DeclareQueueRequest {
                durable: true,
                auto_delete: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Publish(format!(
                "Queue declaration failed {}: {}",
                status, body
            )));
        }

        info!(queue = %self.queue_name, "Declared durable queue");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitMqPublisher {
    async fn publish_batch_processed(&self, event: &BatchEvent) -> Result<()> {
        let request = PublishRequest {
            properties: MessageProperties {
                delivery_mode: PERSISTENT,
                content_type: "application/json",
            },
            routing_key: &self.queue_name,
            payload: serde_json::to_string(event)?,
            payload_encoding: "string",
        };

        let url = self.endpoint(&["exchanges", &self.vhost, "amq.default", "publish"]);
        let response = self
            .http_client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Publish(format!("Broker unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Publish(format!("Broker error {}: {}", status, body)));
        }

        let outcome: PublishResponse = response.json().await?;
        if !outcome.routed {
            return Err(Error::Publish(format!(
                "Message not routed; queue '{}' does not exist",
                self.queue_name
            )));
        }

        debug!(
            batch_id = %event.batch_id,
            queue = %self.queue_name,
            "Published batch event"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rabbitmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(base: &str) -> RabbitMqPublisher {
        RabbitMqPublisher::new(
            base,
            "guest",
            "guest",
            "/",
            "batch_processed",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_encodes_default_vhost() {
        let p = publisher("http://localhost:15672");
        let url = p.endpoint(&["exchanges", "/", "amq.default", "publish"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:15672/api/exchanges/%2F/amq.default/publish"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let p = publisher("http://proxy.local/rabbit/");
        let url = p.endpoint(&["queues", "/", "batch_processed"]);
        assert_eq!(
            url.as_str(),
            "http://proxy.local/rabbit/api/queues/%2F/batch_processed"
        );
    }

    #[test]
    fn test_invalid_url() {
        let err = RabbitMqPublisher::new("not a url", "", "", "/", "q", Duration::from_secs(1));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_publish_error() {
        // Port 9 (discard) is closed on test hosts
        let p = publisher("http://127.0.0.1:9");
        let err = p
            .publish_batch_processed(&BatchEvent::completed("b", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
    }
}
