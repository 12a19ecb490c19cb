//! FIFO allocation of a spend across grant records
//!
//! [`allocate`] only computes what a spend would do. Stores run it while holding their write
//! lock and then persist [`Allocation::updates`], so a shortfall never leaves partial changes.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Deduction, GrantRecord, SpendAmount};

/// New remainder for a record touched by a spend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemainderUpdate {
    pub id: i64,
    /// Remainder the record had when it was read
    ///
    /// Stores can use this to detect a record that changed after the candidates were read.
    pub previous: i64,
    pub remainder: i64,
    pub updated_at: DateTime<Utc>,
}

/// Result of a successful allocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Updates in the order the records were consumed
    pub updates: Vec<RemainderUpdate>,
    /// Points taken per payer, ordered by the first record consumed for each payer
    pub deductions: Vec<Deduction>,
}

/// Not enough unspent points to cover a spend
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("not enough available points: requested {requested}, available {available}")]
pub struct Shortfall {
    pub requested: i64,
    pub available: i64,
}

/// Order records for consumption: oldest first, then by id
pub fn fifo_order(records: &mut [GrantRecord]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

/// Consume `amount` points from `candidates`, oldest grants first
///
/// `candidates` must already be in FIFO order (see [`fifo_order`]). Records without a
/// remainder are skipped.
pub fn allocate(
    candidates: &[GrantRecord],
    amount: SpendAmount,
    now: DateTime<Utc>,
) -> Result<Allocation, Shortfall> {
    let mut needed = amount.get();
    let mut updates = Vec::new();
    let mut deductions: Vec<Deduction> = Vec::new();

    for record in candidates {
        if needed == 0 {
            break;
        }
        if record.remainder <= 0 {
            continue;
        }

        let take = record.remainder.min(needed);
        needed -= take;
        debug!(record = record.id, payer = %record.payer, take, needed, "consuming grant");

        updates.push(RemainderUpdate {
            id: record.id,
            previous: record.remainder,
            remainder: record.remainder - take,
            updated_at: now,
        });
        match deductions.iter_mut().find(|d| d.payer == record.payer) {
            Some(deduction) => deduction.points -= take,
            None => deductions.push(Deduction::new(record.payer.clone(), -take)),
        }
    }

    if needed > 0 {
        return Err(Shortfall {
            requested: amount.get(),
            available: amount.get() - needed,
        });
    }

    Ok(Allocation {
        updates,
        deductions,
    })
}
