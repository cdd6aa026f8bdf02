use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single cart line as reported by the commerce core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub variation_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub currency_code: String,
}

/// Cart lifecycle events consumed from the commerce core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CartEvent {
    ItemAdded { item: CartItem },
    ItemUpdated { item: CartItem },
    ItemRemoved { item: CartItem },
    CartFinalized { order_id: Uuid, items: Vec<CartItem> },
}

/// Row-imported notification from the catalog sync pipeline. Rows without a
/// remote inventory value are ignored by the stock service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSyncEvent {
    pub sku: String,
    pub inventory_level: Option<i64>,
    pub imported_at: DateTime<Utc>,
}

/// Work item queued by the expiration cron and consumed by the expiration
/// worker. Carries only the candidate id; the worker re-fetches the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockExpirationJob {
    pub transaction_id: i64,
}

/// Which bound of the quantity policy corrected a requested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantityBound {
    Minimum,
    Maximum,
}

/// User-visible notice that a requested cart quantity was corrected to fit
/// the configured policy. Published for the commerce core to display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantityNotice {
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub title: String,
    pub requested: i32,
    pub corrected: i32,
    pub bound: QuantityBound,
}

impl QuantityNotice {
    pub fn message(&self) -> String {
        match self.bound {
            QuantityBound::Maximum => format!(
                "Maximum allowed quantity is {}, changing {} quantity to the maximum allowed value.",
                self.corrected, self.title
            ),
            QuantityBound::Minimum => format!(
                "Minimum allowed quantity is {}, changing {} quantity to the minimum allowed value.",
                self.corrected, self.title
            ),
        }
    }
}
