use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Location type marker for the channel-backed inventory pool. The location
/// is provisioned during install and resolved through this marker.
pub const CHANNEL_LOCATION_TYPE: &str = "channel";

/// Ledger transaction kinds. Reservations are stock-out rows with a related
/// order id; reconciliation writes adjustment rows which are never expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    StockIn,
    StockOut,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::StockIn => "stock_in",
            TransactionType::StockOut => "stock_out",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct StockTransaction {
    pub id: i64,
    pub entity_id: Uuid,
    pub location_id: Uuid,
    pub quantity: i32,
    pub unit_price: Option<BigDecimal>,
    pub currency_code: Option<String>,
    pub transaction_type: String,
    pub related_oid: Option<Uuid>,
    pub related_tid: Option<i64>,
    pub transaction_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_transactions)]
pub struct NewStockTransaction {
    pub entity_id: Uuid,
    pub location_id: Uuid,
    pub quantity: i32,
    pub unit_price: Option<BigDecimal>,
    pub currency_code: Option<String>,
    pub transaction_type: String,
    pub related_oid: Option<Uuid>,
    pub related_tid: Option<i64>,
    pub transaction_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_locations)]
pub struct StockLocation {
    pub id: Uuid,
    pub name: String,
    pub location_type: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::product_variations)]
pub struct ProductVariation {
    pub id: Uuid,
    pub sku: String,
    pub remote_product_id: i64,
    pub remote_variant_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}
