use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::StockExpirationJob;
use tokio::time;
use tracing::{error, info, warn};

use crate::error::StockError;
use crate::models::CHANNEL_LOCATION_TYPE;
use crate::settings::StockSettings;
use crate::store::{CatalogStore, TransactionStore};

/// Periodically discovers reservations older than the configured interval
/// and queues their ids for deletion. Discovery is decoupled from deletion
/// so a slow or failing delete never blocks finding further candidates, and
/// double-enqueueing an id is harmless because the worker treats an
/// already-deleted row as done.
pub struct ExpirationCron<S> {
    store: Arc<S>,
    settings: StockSettings,
    producer: FutureProducer,
    topic: String,
}

impl<S: TransactionStore + CatalogStore> ExpirationCron<S> {
    pub fn new(store: Arc<S>, settings: StockSettings, producer: FutureProducer, topic: String) -> Self {
        Self { store, settings, producer, topic }
    }

    pub async fn run(&self, period: Duration) {
        let mut interval = time::interval(period);
        loop {
            interval.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(queued) => info!("queued {} reserved stock transactions for expiration", queued),
                Err(e) => error!("Error queueing stock expirations: {}", e),
            }
        }
    }

    pub async fn run_once(&self) -> Result<usize> {
        let candidates = self.discover(Utc::now()).await?;
        for transaction_id in &candidates {
            self.enqueue(*transaction_id).await?;
        }
        Ok(candidates.len())
    }

    /// Stock-out transactions at the channel location created at or before
    /// `now - reserve_interval`. Empty when reservation is disabled or the
    /// location has not been provisioned.
    pub async fn discover(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StockError> {
        if !self.settings.reserve_stock {
            return Ok(Vec::new());
        }
        let Some(location) = self.store.location_by_type(CHANNEL_LOCATION_TYPE).await? else {
            warn!("no '{}' stock location exists; skipping expiration run", CHANNEL_LOCATION_TYPE);
            return Ok(Vec::new());
        };

        let cutoff = self.settings.reserve_interval.cutoff_from(now);
        let transactions = self.store.stock_out_before(location.id, cutoff).await?;
        Ok(transactions.into_iter().map(|t| t.id).collect())
    }

    async fn enqueue(&self, transaction_id: i64) -> Result<()> {
        let job = StockExpirationJob { transaction_id };
        let json = serde_json::to_string(&job)?;
        let key = transaction_id.to_string();
        let record = FutureRecord::to(&self.topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to queue expiration job: {}", e))?;
        Ok(())
    }
}

/// Consumes queued expiration jobs and deletes the expired reservation
/// together with its reversing sibling, so a reservation and its return
/// never leave an orphaned half in the ledger.
pub struct ExpirationWorker<S> {
    store: Arc<S>,
}

impl<S: TransactionStore> ExpirationWorker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(json_str)) = m.payload_view::<str>() {
                        match serde_json::from_str::<StockExpirationJob>(json_str) {
                            Ok(job) => {
                                if let Err(e) = self.process(job.transaction_id).await {
                                    error!("Error expiring transaction {}: {}", job.transaction_id, e);
                                }
                            }
                            Err(e) => error!("Error parsing expiration job: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, rdkafka::consumer::CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    /// Deletes one candidate and any sibling sharing its order, entity and
    /// location. An id that is already gone (concurrent run, double enqueue)
    /// is treated as done.
    pub async fn process(&self, transaction_id: i64) -> Result<(), StockError> {
        let Some(transaction) = self.store.get(transaction_id).await? else {
            return Ok(());
        };

        self.store.delete(transaction.id).await?;

        if let Some(related_oid) = transaction.related_oid {
            while let Some(sibling) = self
                .store
                .find_sibling(related_oid, transaction.entity_id, transaction.location_id, transaction.id)
                .await?
            {
                self.store.delete(sibling.id).await?;
            }
        }

        info!(
            "expired reserved stock transaction {} for variation {}",
            transaction.id, transaction.entity_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    use super::*;
    use crate::models::*;
    use crate::settings::{ReserveInterval, ReserveUnit};
    use crate::store::MemoryStore;
    use crate::testing::*;

    // Tests drive `discover` + `process` directly; the Kafka hop between
    // them only ferries ids. Producer creation does not contact a broker.
    fn cron(store: &Arc<MemoryStore>, reserve_stock: bool) -> ExpirationCron<MemoryStore> {
        let mut settings = settings(reserve_stock);
        settings.reserve_interval = ReserveInterval { number: 30, unit: ReserveUnit::Minute };
        ExpirationCron::new(store.clone(), settings, test_producer(), "stock-expirations".to_string())
    }

    #[tokio::test]
    async fn a_reservation_expires_after_the_interval_not_before() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let cron = cron(&store, true);

        let created_at = Utc::now();
        let mut reservation =
            transaction(Uuid::new_v4(), location.id, -2, TransactionType::StockOut, Some(Uuid::new_v4()));
        reservation.transaction_time = created_at;
        let id = store.append(reservation).await.unwrap();

        let at_29m = cron.discover(created_at + ChronoDuration::minutes(29)).await.unwrap();
        assert!(at_29m.is_empty());

        let at_31m = cron.discover(created_at + ChronoDuration::minutes(31)).await.unwrap();
        assert_eq!(at_31m, vec![id]);

        ExpirationWorker::new(store.clone()).process(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn processing_deletes_the_sibling_and_nothing_else() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let entity = Uuid::new_v4();
        let order = Uuid::new_v4();

        let reservation = store
            .append(transaction(entity, location.id, -4, TransactionType::StockOut, Some(order)))
            .await
            .unwrap();
        let ret = store
            .append(transaction(entity, location.id, 4, TransactionType::StockIn, Some(order)))
            .await
            .unwrap();
        // Same order but a different entity: must survive.
        let other_entity = store
            .append(transaction(Uuid::new_v4(), location.id, -1, TransactionType::StockOut, Some(order)))
            .await
            .unwrap();
        let unrelated = store
            .append(transaction(entity, location.id, 7, TransactionType::StockIn, None))
            .await
            .unwrap();

        ExpirationWorker::new(store.clone()).process(reservation).await.unwrap();

        assert!(store.get(reservation).await.unwrap().is_none());
        assert!(store.get(ret).await.unwrap().is_none());
        assert!(store.get(other_entity).await.unwrap().is_some());
        assert!(store.get(unrelated).await.unwrap().is_some());

        // Deleting the matched pair leaves the derived level untouched.
        assert_eq!(store.current_level(entity, location.id).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn a_reservation_without_a_sibling_is_deleted_alone() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let entity = Uuid::new_v4();

        let id = store
            .append(transaction(entity, location.id, -3, TransactionType::StockOut, Some(Uuid::new_v4())))
            .await
            .unwrap();

        ExpirationWorker::new(store.clone()).process(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn processing_an_already_deleted_id_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);

        let id = store
            .append(transaction(Uuid::new_v4(), location.id, -2, TransactionType::StockOut, Some(Uuid::new_v4())))
            .await
            .unwrap();

        let worker = ExpirationWorker::new(store.clone());
        worker.process(id).await.unwrap();
        // Double enqueue / overlapping runs land here.
        worker.process(id).await.unwrap();
        worker.process(9999).await.unwrap();
    }

    #[tokio::test]
    async fn discovery_is_empty_when_reservation_is_disabled() {
        let store = Arc::new(MemoryStore::new());
        let location = channel_location(&store);
        let cron = cron(&store, false);

        let mut old = transaction(Uuid::new_v4(), location.id, -2, TransactionType::StockOut, None);
        old.transaction_time = Utc::now() - ChronoDuration::days(2);
        store.append(old).await.unwrap();

        assert!(cron.discover(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn discovery_is_empty_without_a_channel_location() {
        let store = Arc::new(MemoryStore::new());
        let cron = cron(&store, true);

        let mut old = transaction(Uuid::new_v4(), Uuid::new_v4(), -2, TransactionType::StockOut, None);
        old.transaction_time = Utc::now() - ChronoDuration::days(2);
        store.append(old).await.unwrap();

        assert!(cron.discover(Utc::now()).await.unwrap().is_empty());
    }
}
