use std::collections::HashMap;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Scope of the inventory update subscription. One registration per scope is
/// allowed on the channel side.
pub const INVENTORY_SCOPE: &str = "store/inventory/updated";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("a webhook for this scope already exists")]
    AlreadyExists,
    #[error("remote webhook API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("remote webhook API returned {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRequest {
    pub scope: String,
    pub destination: String,
    pub is_active: bool,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRegistration {
    pub id: i64,
    pub scope: String,
    pub destination: String,
    pub is_active: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    data: WebhookRegistration,
}

#[derive(Debug, Deserialize)]
struct RegistrationListResponse {
    data: Vec<WebhookRegistration>,
}

/// Client for the channel's webhook registration API. Registration runs at
/// startup and must tolerate "already exists" by updating the existing
/// subscription instead.
pub struct WebhookClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl WebhookClient {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    pub async fn create(&self, request: &WebhookRequest) -> Result<WebhookRegistration, WebhookError> {
        let response = self
            .client
            .post(format!("{}/hooks", self.base_url))
            .header("X-Auth-Token", &self.access_token)
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Err(WebhookError::AlreadyExists),
            status if status.is_success() => {
                let body: RegistrationResponse = response.json().await?;
                Ok(body.data)
            }
            status => Err(WebhookError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn get_all(&self) -> Result<Vec<WebhookRegistration>, WebhookError> {
        let response = self
            .client
            .get(format!("{}/hooks", self.base_url))
            .header("X-Auth-Token", &self.access_token)
            .send()
            .await?
            .error_for_status()?;
        let body: RegistrationListResponse = response.json().await?;
        Ok(body.data)
    }

    pub async fn update(
        &self,
        id: i64,
        request: &WebhookRequest,
    ) -> Result<WebhookRegistration, WebhookError> {
        let response = self
            .client
            .put(format!("{}/hooks/{}", self.base_url, id))
            .header("X-Auth-Token", &self.access_token)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        let body: RegistrationResponse = response.json().await?;
        Ok(body.data)
    }

    pub async fn delete(&self, id: i64) -> Result<(), WebhookError> {
        self.client
            .delete(format!("{}/hooks/{}", self.base_url, id))
            .header("X-Auth-Token", &self.access_token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Registers the subscription, falling back to updating an existing one
    /// for the same scope. An existing registration with matching auth
    /// headers is returned as-is.
    pub async fn create_or_update(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookRegistration, WebhookError> {
        match self.create(request).await {
            Ok(registration) => {
                info!("registered webhook {} for scope {}", registration.id, registration.scope);
                Ok(registration)
            }
            Err(WebhookError::AlreadyExists) => {
                let existing = self
                    .get_all()
                    .await?
                    .into_iter()
                    .find(|hook| hook.scope == request.scope);

                match existing {
                    Some(hook) if hook.headers == request.headers
                        && hook.destination == request.destination =>
                    {
                        info!("webhook {} for scope {} already registered", hook.id, hook.scope);
                        Ok(hook)
                    }
                    Some(hook) => {
                        info!("updating existing webhook {} for scope {}", hook.id, hook.scope);
                        self.update(hook.id, request).await
                    }
                    None => {
                        error!("webhook conflict reported but no registration found for scope {}", request.scope);
                        Err(WebhookError::AlreadyExists)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}
