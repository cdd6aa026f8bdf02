use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use shared::CartItem;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StockError;
use crate::models::*;
use crate::settings::StockSettings;
use crate::store::{CatalogStore, StoreError, TransactionStore};

/// Creates and reverses stock reservations in response to cart lifecycle
/// events. A reservation is a stock-out transaction tied to an order id; the
/// reversing stock-in is written when the order finalizes or the line is
/// removed, and the expiration cron retires pairs that never converted.
pub struct ReservationManager<S> {
    store: Arc<S>,
    settings: StockSettings,
}

impl<S: TransactionStore + CatalogStore> ReservationManager<S> {
    pub fn new(store: Arc<S>, settings: StockSettings) -> Self {
        Self { store, settings }
    }

    async fn channel_location(&self) -> Result<Option<StockLocation>, StoreError> {
        self.store.location_by_type(CHANNEL_LOCATION_TYPE).await
    }

    /// Reserves stock for a cart line by appending a negative transaction.
    /// The derived level reflects the reservation immediately, before the
    /// remote platform has been told. No-op when reservation is disabled or
    /// the channel location has not been provisioned.
    pub async fn reserve(&self, item: &CartItem) -> Result<(), StockError> {
        if !self.settings.reserve_stock {
            return Ok(());
        }
        let Some(location) = self.channel_location().await? else {
            warn!(
                "no '{}' stock location exists; skipping reservation for order {}",
                CHANNEL_LOCATION_TYPE, item.order_id
            );
            return Ok(());
        };

        let quantity = -item.quantity.abs();
        let id = self
            .store
            .append(NewStockTransaction {
                entity_id: item.variation_id,
                location_id: location.id,
                quantity,
                unit_price: BigDecimal::try_from(item.unit_price).ok(),
                currency_code: Some(item.currency_code.clone()),
                transaction_type: TransactionType::StockOut.as_str().to_string(),
                related_oid: Some(item.order_id),
                related_tid: None,
                transaction_time: Utc::now(),
            })
            .await?;
        info!(
            "reserved {} of variation {} for order {} (transaction {})",
            -quantity, item.variation_id, item.order_id, id
        );

        let level = self.store.current_level(item.variation_id, location.id).await?;
        if level < 0 {
            warn!(
                "stock level for variation {} at location {} is {} after reservation; oversold",
                item.variation_id, location.id, level
            );
        }
        Ok(())
    }

    /// Returns reserved stock for every item of an order. The remote webhook
    /// remains the source of truth for the post-sale level; this only undoes
    /// reservations that did not convert into a confirmed remote change.
    pub async fn release(&self, order_id: Uuid, items: &[CartItem]) -> Result<(), StockError> {
        if !self.settings.reserve_stock {
            return Ok(());
        }
        let Some(location) = self.channel_location().await? else {
            warn!(
                "no '{}' stock location exists; skipping release for order {}",
                CHANNEL_LOCATION_TYPE, order_id
            );
            return Ok(());
        };

        for item in items {
            let quantity = item.quantity.abs();
            let id = self
                .store
                .append(NewStockTransaction {
                    entity_id: item.variation_id,
                    location_id: location.id,
                    quantity,
                    unit_price: BigDecimal::try_from(item.unit_price).ok(),
                    currency_code: Some(item.currency_code.clone()),
                    transaction_type: TransactionType::StockIn.as_str().to_string(),
                    related_oid: Some(order_id),
                    related_tid: None,
                    transaction_time: Utc::now(),
                })
                .await?;
            info!(
                "returned {} of variation {} for order {} (transaction {})",
                quantity, item.variation_id, order_id, id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::*;

    fn manager(store: &Arc<MemoryStore>, reserve_stock: bool) -> ReservationManager<MemoryStore> {
        ReservationManager::new(store.clone(), settings(reserve_stock))
    }

    #[tokio::test]
    async fn reserve_writes_a_negative_stock_out_tied_to_the_order() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let item = cart_item(3);

        manager(&store, true).reserve(&item).await.unwrap();

        let level = store.current_level(item.variation_id, location.id).await.unwrap();
        assert_eq!(level, -3);

        let reservation = store.latest_transaction(item.variation_id, location.id).await.unwrap().unwrap();
        assert_eq!(reservation.quantity, -3);
        assert_eq!(reservation.transaction_type, TransactionType::StockOut.as_str());
        assert_eq!(reservation.related_oid, Some(item.order_id));
    }

    #[tokio::test]
    async fn reserve_is_a_no_op_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        channel_location(&store);
        let item = cart_item(3);

        manager(&store, false).reserve(&item).await.unwrap();

        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn reserve_is_a_no_op_without_a_channel_location() {
        let store = Arc::new(MemoryStore::new());
        let item = cart_item(3);

        manager(&store, true).reserve(&item).await.unwrap();

        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn release_restores_the_pre_reservation_level() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let item = cart_item(4);

        // Baseline stock of 10 before the reservation.
        store
            .append(transaction(item.variation_id, location.id, 10, TransactionType::StockIn, None))
            .await
            .unwrap();

        let manager = manager(&store, true);
        manager.reserve(&item).await.unwrap();
        assert_eq!(store.current_level(item.variation_id, location.id).await.unwrap(), 6);

        manager.release(item.order_id, std::slice::from_ref(&item)).await.unwrap();
        assert_eq!(store.current_level(item.variation_id, location.id).await.unwrap(), 10);

        // The return is findable as the reservation's sibling.
        let candidates = store
            .stock_out_before(location.id, Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        let reservation = candidates.iter().find(|t| t.related_oid == Some(item.order_id)).unwrap();
        let sibling = store
            .find_sibling(item.order_id, item.variation_id, location.id, reservation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sibling.quantity, 4);
        assert_eq!(sibling.transaction_type, TransactionType::StockIn.as_str());
    }

    #[tokio::test]
    async fn release_covers_every_item_of_the_order() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let first = cart_item(2);
        let mut second = cart_item(5);
        second.order_id = first.order_id;

        let manager = manager(&store, true);
        manager.reserve(&first).await.unwrap();
        manager.reserve(&second).await.unwrap();

        manager
            .release(first.order_id, &[first.clone(), second.clone()])
            .await
            .unwrap();

        assert_eq!(store.current_level(first.variation_id, location.id).await.unwrap(), 0);
        assert_eq!(store.current_level(second.variation_id, location.id).await.unwrap(), 0);
    }
}
