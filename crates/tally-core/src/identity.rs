//! Identity service client
//!
//! Resolves a bearer token to a user id through
//! `GET {url}/auth/validate?token=...`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::error::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    revoked: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Clone)]
pub struct IdentityClient {
    http_client: Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from config; `None` when no identity service is configured
    pub fn from_config(config: &IdentityConfig) -> Result<Option<Self>> {
        match &config.url {
            Some(url) => Self::new(url, config.timeout()).map(Some),
            None => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate a token
    ///
    /// `Ok(None)` means the service answered but the token is not usable
    /// (401/403, invalid, revoked, inactive user, unusable user id). `Err`
    /// means the service could not be asked or failed to answer (5xx).
    pub async fn validate_token(&self, token: &str) -> Result<Option<String>> {
        let response = self
            .http_client
            .get(format!("{}/auth/validate", self.base_url))
            .query(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = %status, "Token rejected by identity service");
            return Ok(None);
        }

        let body: ValidateResponse = response.error_for_status()?.json().await?;
        let active = body.valid && !body.revoked && body.status.as_deref() == Some("active");
        if !active {
            return Ok(None);
        }

        let Some(id) = body.user_id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        match uuid::Uuid::parse_str(&id) {
            Ok(parsed) => Ok(Some(parsed.to_string())),
            Err(_) => {
                warn!(user_id = %id, "Identity service returned a malformed user id");
                Ok(None)
            }
        }
    }
}
