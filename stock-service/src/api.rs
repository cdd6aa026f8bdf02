use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::catalog::VariantLookup;
use crate::error::StockError;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::store::{CatalogStore, TransactionStore};

/// Shared credentials the channel attaches to every webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookCredentials {
    pub username: String,
    pub password: String,
}

pub struct AppState<S> {
    pub store: Arc<S>,
    pub variants: Arc<dyn VariantLookup>,
    pub credentials: WebhookCredentials,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            variants: self.variants.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryWebhookPayload {
    pub scope: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookData {
    pub inventory: InventoryUpdate,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub method: String,
    pub product_id: i64,
    pub variant_id: i64,
    pub value: i64,
}

pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: TransactionStore + CatalogStore + 'static,
{
    Router::new()
        .route("/webhooks/inventory", post(inventory_webhook::<S>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Processes an inbound inventory update. Fully synchronous end-to-end: the
/// channel treats anything but a 2xx as "retry later", and corrective writes
/// are idempotent, so retries are safe.
pub async fn inventory_webhook<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(payload): Json<InventoryWebhookPayload>,
) -> StatusCode
where
    S: TransactionStore + CatalogStore + 'static,
{
    if !authorized(&headers, &state.credentials) {
        return StatusCode::UNAUTHORIZED;
    }

    let update = payload.data.inventory;
    if update.method != "absolute" {
        // Relative updates would double-apply deltas the ledger already
        // holds. Acknowledge so the channel stops resending.
        return StatusCode::OK;
    }

    let sku = match state.variants.variant_sku(update.product_id, update.variant_id).await {
        Ok(sku) => sku,
        Err(e) => {
            warn!("could not resolve variant {} of product {}: {}", update.variant_id, update.product_id, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match Reconciler::new(state.store).reconcile_sku(&sku, update.value).await {
        Ok(ReconcileOutcome::Corrected { .. }) | Ok(ReconcileOutcome::Unchanged) => StatusCode::OK,
        Ok(ReconcileOutcome::NotReady) => {
            // The catalog sync has not imported this variation yet. A
            // client-error reply makes the channel retry later.
            error!(
                "variation with the sku {} is missing; check that the catalog sync completed",
                sku
            );
            StatusCode::BAD_REQUEST
        }
        Err(StockError::MissingLocation(location_type)) => {
            error!("missing '{}' stock location", location_type);
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            error!("Error reconciling stock for sku {}: {}", sku, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn authorized(headers: &HeaderMap, credentials: &WebhookCredentials) -> bool {
    let username = headers.get("Username").and_then(|v| v.to_str().ok());
    let password = headers.get("Password").and_then(|v| v.to_str().ok());
    username == Some(credentials.username.as_str()) && password == Some(credentials.password.as_str())
}

pub async fn health_check() -> &'static str {
    "OK"
}
