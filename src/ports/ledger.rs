use crate::domain::{Balances, Deduction, GrantRecord, NewGrant, SpendAmount};

#[mockall::automock]
#[async_trait::async_trait]
pub trait LedgerPort {
    /// Append a grant to the ledger
    ///
    /// Fails with [`Error::GrantOverflow`] when the unspent total of the whole ledger would no
    /// longer fit in an `i64`.
    async fn insert_grant(&self, grant: NewGrant) -> Result<GrantRecord, Error>;

    /// Spend points oldest-first across all payers
    ///
    /// This is all-or-nothing: on any error no remainder is changed.
    async fn spend(&self, amount: SpendAmount) -> Result<Vec<Deduction>, Error>;

    /// Current spendable points per payer
    async fn balances(&self) -> Result<Balances, Error>;

    /// Every grant record in FIFO order
    async fn grants(&self) -> Result<Vec<GrantRecord>, Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not enough unspent points across all payers
    #[error("not enough available points: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    /// Accepting the grant would push the unspent total past `i64::MAX`
    #[error("granting {points} points would overflow the unspent total")]
    GrantOverflow { points: i64 },

    /// A record changed between the candidate read and its update
    ///
    /// Stores that serialize spends never see this; it guards the compare-and-set update.
    /// The whole spend was rolled back and can be retried.
    #[error("grant {id} was modified concurrently")]
    Conflict { id: i64 },

    /// Concrete adapter errors
    ///
    /// This could represent any errors from a concrete adapter that is not part of the domain
    /// model, such as connectivity, configuration, or permission errors.
    #[error("adapter error: {0:?}")]
    Adapter(Box<dyn std::error::Error + Send + Sync>),
}

impl From<crate::domain::allocator::Shortfall> for Error {
    fn from(shortfall: crate::domain::allocator::Shortfall) -> Self {
        Self::InsufficientFunds {
            requested: shortfall.requested,
            available: shortfall.available,
        }
    }
}
