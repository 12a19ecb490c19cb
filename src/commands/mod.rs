use std::{borrow::Cow, future::Future, sync::Arc, time::Duration};

use tracing::warn;

use crate::{config::Config, domain::NonPositiveAmount, ports::ledger};

pub mod balances;
pub mod grant;
pub mod ledger_history;
pub mod spend;

/// Entry point for every ledger operation
///
/// Each request type has its own [`tower::Service`] implementation in the submodules.
pub struct DomainLogic<L> {
    ledger: Arc<L>,
    config: Arc<Config>,
}

impl<L> DomainLogic<L> {
    pub fn new(ledger: Arc<L>, config: Arc<Config>) -> Self {
        Self { ledger, config }
    }
}

impl<L> Clone for DomainLogic<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request was rejected before reaching the ledger
    #[error("invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    /// Not enough unspent points across all payers
    ///
    /// The ledger is left unchanged.
    #[error("not enough available points: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    /// The ledger could not complete the operation
    ///
    /// Nothing was committed. Callers may retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

impl From<ledger::Error> for Error {
    fn from(err: ledger::Error) -> Self {
        match err {
            ledger::Error::InsufficientFunds {
                requested,
                available,
            } => Error::InsufficientFunds {
                requested,
                available,
            },
            err @ ledger::Error::GrantOverflow { .. } => {
                Error::InvalidRequest(err.to_string().into())
            }
            err @ ledger::Error::Conflict { .. } => Error::StoreUnavailable(Box::new(err)),
            ledger::Error::Adapter(err) => Error::StoreUnavailable(err),
        }
    }
}

impl From<NonPositiveAmount> for Error {
    fn from(err: NonPositiveAmount) -> Self {
        Error::InvalidRequest(err.to_string().into())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("ledger operation timed out after {0:?}")]
pub struct Timeout(Duration);

/// Run a ledger call, giving up after `limit`
///
/// On timeout the call's future is dropped, which rolls back any open transaction.
async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, ledger::Error>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(res) => res.map_err(Into::into),
        Err(_) => {
            warn!(?limit, "ledger operation timed out");
            Err(Error::StoreUnavailable(Box::new(Timeout(limit))))
        }
    }
}
