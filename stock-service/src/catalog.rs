use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("remote catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("variant {variant_id} of product {product_id} not found on the channel")]
    VariantNotFound { product_id: i64, variant_id: i64 },
}

/// Resolves remote variant identifiers to SKUs. The inventory webhook only
/// carries remote ids; the local catalog is keyed by SKU.
#[async_trait]
pub trait VariantLookup: Send + Sync {
    async fn variant_sku(&self, product_id: i64, variant_id: i64) -> Result<String, CatalogError>;
}

/// Channel catalog API client.
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct VariantResponse {
    data: VariantData,
}

#[derive(Debug, Deserialize)]
struct VariantData {
    sku: String,
}

impl CatalogClient {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }
}

#[async_trait]
impl VariantLookup for CatalogClient {
    async fn variant_sku(&self, product_id: i64, variant_id: i64) -> Result<String, CatalogError> {
        let url = format!(
            "{}/catalog/products/{}/variants/{}",
            self.base_url, product_id, variant_id
        );
        let response = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CatalogError::VariantNotFound { product_id, variant_id });
        }
        let body: VariantResponse = response.error_for_status()?.json().await?;
        Ok(body.data.sku)
    }
}
