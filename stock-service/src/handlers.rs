use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::{CartEvent, CartItem, CatalogSyncEvent, QuantityNotice};
use tracing::{error, info, warn};

use crate::error::StockError;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::reservation::ReservationManager;
use crate::settings::{QuantityPolicy, StockSettings};
use crate::store::{CatalogStore, TransactionStore};

/// Applies the quantity policy and drives the reservation manager for each
/// cart lifecycle event. Returns the user-facing notices so the Kafka layer
/// can publish them: clamping happens before reserving, so the reservation
/// reflects the enforced quantity.
pub struct CartEventProcessor<S> {
    reservations: ReservationManager<S>,
    policy: QuantityPolicy,
}

impl<S: TransactionStore + CatalogStore> CartEventProcessor<S> {
    pub fn new(store: Arc<S>, settings: StockSettings) -> Self {
        Self {
            policy: settings.quantity_policy,
            reservations: ReservationManager::new(store, settings),
        }
    }

    pub async fn handle(&self, event: CartEvent) -> Result<Vec<QuantityNotice>, StockError> {
        match event {
            CartEvent::ItemAdded { item } => {
                let (item, notice) = self.enforce(item);
                self.reservations.reserve(&item).await?;
                Ok(notice.into_iter().collect())
            }
            CartEvent::ItemUpdated { item } => {
                let (_, notice) = self.enforce(item);
                Ok(notice.into_iter().collect())
            }
            CartEvent::ItemRemoved { item } => {
                self.reservations
                    .release(item.order_id, std::slice::from_ref(&item))
                    .await?;
                Ok(Vec::new())
            }
            CartEvent::CartFinalized { order_id, items } => {
                self.reservations.release(order_id, &items).await?;
                Ok(Vec::new())
            }
        }
    }

    fn enforce(&self, mut item: CartItem) -> (CartItem, Option<QuantityNotice>) {
        let (corrected, bound) = self.policy.enforce(item.quantity);
        let notice = bound.map(|bound| QuantityNotice {
            order_id: item.order_id,
            order_item_id: item.order_item_id,
            title: item.title.clone(),
            requested: item.quantity,
            corrected,
            bound,
        });
        item.quantity = corrected;
        (item, notice)
    }
}

/// Kafka loop for the cart lifecycle topic.
pub struct CartEventHandler<S> {
    processor: CartEventProcessor<S>,
    producer: FutureProducer,
    notice_topic: String,
}

impl<S: TransactionStore + CatalogStore> CartEventHandler<S> {
    pub fn new(store: Arc<S>, settings: StockSettings, producer: FutureProducer, notice_topic: String) -> Self {
        Self {
            processor: CartEventProcessor::new(store, settings),
            producer,
            notice_topic,
        }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(json_str)) = m.payload_view::<str>() {
                        match serde_json::from_str::<CartEvent>(json_str) {
                            Ok(event) => {
                                if let Err(e) = self.handle_event(event).await {
                                    error!("Error handling cart event: {}", e);
                                }
                            }
                            Err(e) => error!("Error parsing cart event: {}", e),
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

    async fn handle_event(&self, event: CartEvent) -> Result<()> {
        for notice in self.processor.handle(event).await? {
            warn!("{}", notice.message());
            self.send_notice(notice).await?;
        }
        Ok(())
    }

    async fn send_notice(&self, notice: QuantityNotice) -> Result<()> {
        let json = serde_json::to_string(&notice)?;
        let key = notice.order_id.to_string();
        let record = FutureRecord::to(&self.notice_topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send quantity notice: {}", e))?;
        Ok(())
    }
}

/// Kafka loop for the catalog sync topic. Every imported row carrying a
/// remote inventory value runs through the same reconciliation as the
/// webhook, which covers items that existed before the webhook was
/// registered and makes re-running the sync idempotent.
pub struct CatalogSyncHandler<S> {
    reconciler: Reconciler<S>,
}

impl<S: TransactionStore + CatalogStore> CatalogSyncHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { reconciler: Reconciler::new(store) }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(Ok(json_str)) = m.payload_view::<str>() {
                        match serde_json::from_str::<CatalogSyncEvent>(json_str) {
                            Ok(event) => {
                                if let Err(e) = self.handle_event(event).await {
                                    error!("Error handling catalog sync event: {}", e);
                                }
                            }
                            Err(e) => error!("Error parsing catalog sync event: {}", e),
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

    async fn handle_event(&self, event: CatalogSyncEvent) -> Result<()> {
        let Some(inventory_level) = event.inventory_level else {
            return Ok(());
        };

        match self.reconciler.reconcile_sku(&event.sku, inventory_level).await? {
            ReconcileOutcome::NotReady => {
                info!("variation {} not imported yet; retrying on a later sync event", event.sku);
            }
            ReconcileOutcome::Corrected { .. } | ReconcileOutcome::Unchanged => {}
        }
        Ok(())
    }
}
