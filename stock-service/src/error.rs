use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the reservation and reconciliation components. Ledger
/// write failures always propagate; a missing location is a configuration
/// error on the paths that cannot degrade to a no-op.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("no stock location of type '{0}' exists")]
    MissingLocation(&'static str),
    #[error("corrective delta {delta} does not fit a transaction quantity")]
    CorrectionOutOfRange { delta: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}
