use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::StockError;
use crate::models::*;
use crate::store::{CatalogStore, TransactionStore};

/// Result of applying an authoritative remote stock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A corrective transaction was written; the derived level now equals
    /// the remote value.
    Corrected { transaction_id: i64, previous: i64 },
    /// The derived level already matched; nothing was written.
    Unchanged,
    /// The item is not locally known yet. The caller retries on a later
    /// webhook delivery or sync pass.
    NotReady,
}

/// Applies authoritative remote stock values to the ledger. Both the webhook
/// push path and the bulk catalog sync path run through `reconcile_sku`, so
/// items that predate the webhook registration are covered by the sync pass.
pub struct Reconciler<S> {
    store: Arc<S>,
}

impl<S: TransactionStore + CatalogStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolves the item and channel location, then corrects the level.
    pub async fn reconcile_sku(&self, sku: &str, value: i64) -> Result<ReconcileOutcome, StockError> {
        let Some(variation) = self.store.variation_by_sku(sku).await? else {
            return Ok(ReconcileOutcome::NotReady);
        };
        let Some(location) = self.store.location_by_type(CHANNEL_LOCATION_TYPE).await? else {
            return Err(StockError::MissingLocation(CHANNEL_LOCATION_TYPE));
        };
        self.set_absolute_level(variation.id, location.id, value).await
    }

    /// Writes one adjustment transaction so the derived level equals `value`
    /// exactly, anchored at the latest transaction for the pair. Idempotent:
    /// applying the same value twice writes nothing the second time.
    pub async fn set_absolute_level(
        &self,
        entity_id: Uuid,
        location_id: Uuid,
        value: i64,
    ) -> Result<ReconcileOutcome, StockError> {
        let current = self.store.current_level(entity_id, location_id).await?;
        if current == value {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let delta = i32::try_from(value - current)
            .map_err(|_| StockError::CorrectionOutOfRange { delta: value - current })?;
        let latest = self.store.latest_transaction(entity_id, location_id).await?;

        let transaction_id = self
            .store
            .append(NewStockTransaction {
                entity_id,
                location_id,
                quantity: delta,
                unit_price: None,
                currency_code: None,
                transaction_type: TransactionType::Adjustment.as_str().to_string(),
                related_oid: None,
                related_tid: latest.map(|t| t.id),
                transaction_time: Utc::now(),
            })
            .await?;
        info!(
            "corrected stock level for variation {} at location {} from {} to {} (transaction {})",
            entity_id, location_id, current, value, transaction_id
        );
        Ok(ReconcileOutcome::Corrected { transaction_id, previous: current })
    }
}
