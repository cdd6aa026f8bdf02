use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
}

/// Storage port for the stock ledger. The ledger is the single source of
/// truth for quantity: writes are durable before these calls return, and the
/// derived level for an (entity, location) pair is always the sum of what is
/// currently recorded for it.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Appends a transaction and returns its assigned id.
    async fn append(&self, transaction: NewStockTransaction) -> Result<i64, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<StockTransaction>, StoreError>;

    /// Deletes a transaction. Deleting an already-removed row is Ok, which
    /// keeps expiry safe under overlapping runs.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Finds a transaction for the same order, entity and location with a
    /// different id, i.e. the reversing half of a reservation pair.
    async fn find_sibling(
        &self,
        related_oid: Uuid,
        entity_id: Uuid,
        location_id: Uuid,
        exclude_id: i64,
    ) -> Result<Option<StockTransaction>, StoreError>;

    /// Stock-out transactions at a location created at or before the cutoff.
    async fn stock_out_before(
        &self,
        location_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StockTransaction>, StoreError>;

    /// Derived stock level for the pair, computed from the ledger on every
    /// call. No caching; concurrent writers may change it at any time.
    async fn current_level(&self, entity_id: Uuid, location_id: Uuid) -> Result<i64, StoreError>;

    /// Most recently appended transaction for the pair. Corrective entries
    /// anchor to it.
    async fn latest_transaction(
        &self,
        entity_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<StockTransaction>, StoreError>;
}

/// Lookup port for the synchronized catalog and the channel location.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn variation_by_sku(&self, sku: &str) -> Result<Option<ProductVariation>, StoreError>;

    async fn location_by_type(
        &self,
        location_type: &str,
    ) -> Result<Option<StockLocation>, StoreError>;
}

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn append(&self, transaction: NewStockTransaction) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let id = diesel::insert_into(stock_transactions::table)
            .values(&transaction)
            .returning(stock_transactions::id)
            .get_result::<i64>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<StockTransaction>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let transaction = stock_transactions::table
            .find(id)
            .first::<StockTransaction>(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        diesel::delete(stock_transactions::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn find_sibling(
        &self,
        related_oid: Uuid,
        entity_id: Uuid,
        location_id: Uuid,
        exclude_id: i64,
    ) -> Result<Option<StockTransaction>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let sibling = stock_transactions::table
            .filter(stock_transactions::related_oid.eq(related_oid))
            .filter(stock_transactions::entity_id.eq(entity_id))
            .filter(stock_transactions::location_id.eq(location_id))
            .filter(stock_transactions::id.ne(exclude_id))
            .order(stock_transactions::id.asc())
            .first::<StockTransaction>(&mut conn)
            .await
            .optional()?;
        Ok(sibling)
    }

    async fn stock_out_before(
        &self,
        location_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StockTransaction>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let transactions = stock_transactions::table
            .filter(stock_transactions::location_id.eq(location_id))
            .filter(stock_transactions::transaction_type.eq(TransactionType::StockOut.as_str()))
            .filter(stock_transactions::transaction_time.le(cutoff))
            .order(stock_transactions::id.asc())
            .load::<StockTransaction>(&mut conn)
            .await?;
        Ok(transactions)
    }

    async fn current_level(&self, entity_id: Uuid, location_id: Uuid) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let level = stock_transactions::table
            .filter(stock_transactions::entity_id.eq(entity_id))
            .filter(stock_transactions::location_id.eq(location_id))
            .select(sum(stock_transactions::quantity))
            .get_result::<Option<i64>>(&mut conn)
            .await?;
        Ok(level.unwrap_or(0))
    }

    async fn latest_transaction(
        &self,
        entity_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<StockTransaction>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let transaction = stock_transactions::table
            .filter(stock_transactions::entity_id.eq(entity_id))
            .filter(stock_transactions::location_id.eq(location_id))
            .order(stock_transactions::id.desc())
            .first::<StockTransaction>(&mut conn)
            .await
            .optional()?;
        Ok(transaction)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn variation_by_sku(&self, sku: &str) -> Result<Option<ProductVariation>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let variation = product_variations::table
            .filter(product_variations::sku.eq(sku))
            .first::<ProductVariation>(&mut conn)
            .await
            .optional()?;
        Ok(variation)
    }

    async fn location_by_type(
        &self,
        location_type: &str,
    ) -> Result<Option<StockLocation>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let location = stock_locations::table
            .filter(stock_locations::location_type.eq(location_type))
            .first::<StockLocation>(&mut conn)
            .await
            .optional()?;
        Ok(location)
    }
}

/// In-memory ledger with the same semantics as `PgStore`, used by the tests.
#[cfg(test)]
pub use memory::MemoryStore;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[tokio::test]
    async fn current_level_is_the_sum_regardless_of_insertion_order() {
        let store = MemoryStore::new();
        let entity = Uuid::new_v4();
        let location = Uuid::new_v4();

        for quantity in [25, -3, -1, 7, -10] {
            store
                .append(transaction(entity, location, quantity, TransactionType::StockOut, None))
                .await
                .unwrap();
        }
        assert_eq!(store.current_level(entity, location).await.unwrap(), 18);

        // Same deltas in a different order sum to the same level.
        let entity2 = Uuid::new_v4();
        for quantity in [-10, 7, -1, -3, 25] {
            store
                .append(transaction(entity2, location, quantity, TransactionType::StockOut, None))
                .await
                .unwrap();
        }
        assert_eq!(store.current_level(entity2, location).await.unwrap(), 18);
    }

    #[tokio::test]
    async fn current_level_of_an_empty_pair_is_zero() {
        let store = MemoryStore::new();
        let level = store.current_level(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        assert_eq!(level, 0);
    }

    #[tokio::test]
    async fn latest_transaction_returns_the_highest_id_for_the_pair() {
        let store = MemoryStore::new();
        let entity = Uuid::new_v4();
        let location = Uuid::new_v4();

        store
            .append(transaction(entity, location, 5, TransactionType::StockIn, None))
            .await
            .unwrap();
        let last = store
            .append(transaction(entity, location, -2, TransactionType::StockOut, None))
            .await
            .unwrap();
        store
            .append(transaction(Uuid::new_v4(), location, 9, TransactionType::StockIn, None))
            .await
            .unwrap();

        let latest = store.latest_transaction(entity, location).await.unwrap().unwrap();
        assert_eq!(latest.id, last);
    }

    #[tokio::test]
    async fn find_sibling_excludes_the_given_id_and_other_entities() {
        let store = MemoryStore::new();
        let entity = Uuid::new_v4();
        let location = Uuid::new_v4();
        let order = Uuid::new_v4();

        let reservation = store
            .append(transaction(entity, location, -4, TransactionType::StockOut, Some(order)))
            .await
            .unwrap();
        // Same order, different entity: must not match.
        store
            .append(transaction(Uuid::new_v4(), location, -1, TransactionType::StockOut, Some(order)))
            .await
            .unwrap();
        let ret = store
            .append(transaction(entity, location, 4, TransactionType::StockIn, Some(order)))
            .await
            .unwrap();

        let sibling = store
            .find_sibling(order, entity, location, reservation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sibling.id, ret);

        let reverse = store.find_sibling(order, entity, location, ret).await.unwrap();
        assert_eq!(reverse.unwrap().id, reservation);
    }

    #[tokio::test]
    async fn stock_out_before_filters_by_type_time_and_location() {
        let store = MemoryStore::new();
        let entity = Uuid::new_v4();
        let location = Uuid::new_v4();
        let cutoff = Utc::now();

        let mut old_out = transaction(entity, location, -2, TransactionType::StockOut, None);
        old_out.transaction_time = cutoff - chrono::Duration::hours(1);
        let old_id = store.append(old_out).await.unwrap();

        let mut old_adjustment = transaction(entity, location, 8, TransactionType::Adjustment, None);
        old_adjustment.transaction_time = cutoff - chrono::Duration::hours(1);
        store.append(old_adjustment).await.unwrap();

        let mut fresh = transaction(entity, location, -5, TransactionType::StockOut, None);
        fresh.transaction_time = cutoff + chrono::Duration::minutes(1);
        store.append(fresh).await.unwrap();

        let mut elsewhere = transaction(entity, Uuid::new_v4(), -3, TransactionType::StockOut, None);
        elsewhere.transaction_time = cutoff - chrono::Duration::hours(1);
        store.append(elsewhere).await.unwrap();

        let candidates = store.stock_out_before(location, cutoff).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, old_id);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = store
            .append(transaction(Uuid::new_v4(), Uuid::new_v4(), -1, TransactionType::StockOut, None))
            .await
            .unwrap();

        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }
}
