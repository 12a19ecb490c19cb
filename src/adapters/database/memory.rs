use crate::{
    domain::{
        aggregate_balances,
        allocator::{allocate, fifo_order},
        total_after_grant, Balances, Deduction, GrantRecord, NewGrant, SpendAmount,
    },
    ports::ledger::{Error, LedgerPort},
};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<GrantRecord>,
    last_id: i64,
}

/// Ledger kept in process memory
///
/// One mutex guards the whole ledger, so spends are serialized against each other and against
/// reads. Nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    ledger: Arc<Mutex<Ledger>>,
}

#[async_trait::async_trait]
impl LedgerPort for MemoryLedger {
    async fn insert_grant(&self, grant: NewGrant) -> Result<GrantRecord, Error> {
        let mut ledger = self.ledger.lock()?;
        let total = ledger.records.iter().map(|r| r.remainder).sum();
        total_after_grant(total, grant.points).map_err(|_| Error::GrantOverflow {
            points: grant.points,
        })?;

        ledger.last_id += 1;
        let record = GrantRecord {
            id: ledger.last_id,
            payer: grant.payer,
            granted_points: grant.points,
            remainder: GrantRecord::initial_remainder(grant.points),
            created_at: grant.created_at.unwrap_or_else(Utc::now),
            updated_at: None,
        };
        ledger.records.push(record.clone());

        Ok(record)
    }

    async fn spend(&self, amount: SpendAmount) -> Result<Vec<Deduction>, Error> {
        let mut ledger = self.ledger.lock()?;

        let mut candidates: Vec<GrantRecord> = ledger
            .records
            .iter()
            .filter(|record| record.remainder > 0)
            .cloned()
            .collect();
        fifo_order(&mut candidates);

        // Nothing is written until the allocation is known to cover the whole amount
        let allocation = allocate(&candidates, amount, Utc::now())?;
        for update in &allocation.updates {
            if let Some(record) = ledger.records.iter_mut().find(|r| r.id == update.id) {
                record.remainder = update.remainder;
                record.updated_at = Some(update.updated_at);
            }
        }
        info!(
            points = amount.get(),
            records = allocation.updates.len(),
            "spent points from memory ledger"
        );

        Ok(allocation.deductions)
    }

    async fn balances(&self) -> Result<Balances, Error> {
        let ledger = self.ledger.lock()?;
        aggregate_balances(&ledger.records).map_err(|err| Error::Adapter(Box::new(err)))
    }

    async fn grants(&self) -> Result<Vec<GrantRecord>, Error> {
        let mut records = self.ledger.lock()?.records.clone();
        fifo_order(&mut records);
        Ok(records)
    }
}

/// Erased [`PoisonError`]
///
/// `PoisonError` keeps the `MutexGuard` internally, which is not send. Thus we erase the error
/// and only keep the string representation instead.
#[derive(Debug, thiserror::Error)]
#[error("poison error: {0}")]
pub struct ErasedPoisonError(String);

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Self::Adapter(Box::new(ErasedPoisonError(err.to_string())))
    }
}
