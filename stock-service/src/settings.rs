use anyhow::Result;
use chrono::{DateTime, Duration, Months, Utc};
use clap::ValueEnum;
use shared::QuantityBound;

/// Unit of the reservation retention interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReserveUnit {
    Minute,
    Hour,
    Day,
    Month,
}

/// How long a reservation is held before the expiration cron retires it.
#[derive(Debug, Clone, Copy)]
pub struct ReserveInterval {
    pub number: u32,
    pub unit: ReserveUnit,
}

impl ReserveInterval {
    /// Reservations created at or before the returned instant are expired.
    /// Months use calendar arithmetic rather than a fixed number of days.
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.unit {
            ReserveUnit::Minute => now - Duration::minutes(i64::from(self.number)),
            ReserveUnit::Hour => now - Duration::hours(i64::from(self.number)),
            ReserveUnit::Day => now - Duration::days(i64::from(self.number)),
            ReserveUnit::Month => now - Months::new(self.number),
        }
    }
}

/// Global (not per-item) order quantity bounds.
#[derive(Debug, Clone, Copy)]
pub struct QuantityPolicy {
    pub enabled: bool,
    pub minimum: i32,
    pub maximum: i32,
}

impl QuantityPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.minimum > self.maximum {
            anyhow::bail!(
                "quantity policy minimum ({}) exceeds maximum ({})",
                self.minimum,
                self.maximum
            );
        }
        Ok(())
    }

    /// Clamps a requested quantity to the configured bounds. Returns the
    /// enforced value and the bound that applied, if any. Corrections are
    /// user-visible notices, never errors.
    pub fn enforce(&self, quantity: i32) -> (i32, Option<QuantityBound>) {
        if !self.enabled {
            return (quantity, None);
        }
        if quantity > self.maximum {
            (self.maximum, Some(QuantityBound::Maximum))
        } else if quantity < self.minimum {
            (self.minimum, Some(QuantityBound::Minimum))
        } else {
            (quantity, None)
        }
    }
}

/// Runtime configuration for the reservation and expiry components.
#[derive(Debug, Clone)]
pub struct StockSettings {
    /// When false, reservation and policy enforcement are no-ops.
    pub reserve_stock: bool,
    pub reserve_interval: ReserveInterval,
    pub quantity_policy: QuantityPolicy,
}
