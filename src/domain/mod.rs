use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod allocator;

/// Current spendable points per payer
pub type Balances = HashMap<String, i64>;

/// A single point grant in the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GrantRecord {
    /// Identifier assigned by the store
    ///
    /// Identifiers increase monotonically and break ties between records with the same
    /// `created_at`.
    pub id: i64,
    /// Partner that issued the points
    pub payer: String,
    /// Points as originally granted
    ///
    /// A negative number is a correction. It is recorded but never becomes spendable.
    pub granted_points: i64,
    /// Points from this grant that have not been spent yet
    pub remainder: i64,
    pub created_at: DateTime<Utc>,
    /// Last time `remainder` changed, `None` until the first spend touches this record
    pub updated_at: Option<DateTime<Utc>>,
}

impl GrantRecord {
    /// Spendable points for a freshly granted amount
    pub fn initial_remainder(granted_points: i64) -> i64 {
        granted_points.max(0)
    }
}

/// Input for appending a grant to the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewGrant {
    pub payer: String,
    pub points: i64,
    /// When the points were issued
    ///
    /// Stores use the current time when this is `None`.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewGrant {
    pub fn new(payer: impl Into<String>, points: i64) -> Self {
        Self {
            payer: payer.into(),
            points,
            created_at: None,
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Strictly positive number of points to spend
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpendAmount(i64);

impl SpendAmount {
    pub fn get(self) -> i64 {
        self.0
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("spend amount must be positive, got {0}")]
pub struct NonPositiveAmount(pub i64);

impl TryFrom<i64> for SpendAmount {
    type Error = NonPositiveAmount;

    fn try_from(points: i64) -> Result<Self, Self::Error> {
        if points > 0 {
            Ok(Self(points))
        } else {
            Err(NonPositiveAmount(points))
        }
    }
}

/// Points taken from a payer by a spend
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deduction {
    pub payer: String,
    /// Always negative: this is reported as points removed from the payer
    pub points: i64,
}

impl Deduction {
    pub fn new(payer: impl Into<String>, points: i64) -> Self {
        Self {
            payer: payer.into(),
            points,
        }
    }
}

/// Unspent points no longer fit in an `i64`
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unspent point total would exceed {}", i64::MAX)]
pub struct PointsOverflow;

/// Total unspent points once a grant of `points` is added to a ledger holding `total`
///
/// Stores check this before inserting so that every balance, and the sum of all balances,
/// stays representable.
pub fn total_after_grant(total: i64, points: i64) -> Result<i64, PointsOverflow> {
    total
        .checked_add(GrantRecord::initial_remainder(points))
        .ok_or(PointsOverflow)
}

/// Sum remainders per payer
///
/// Every payer that owns at least one record gets an entry, even when all of its points are
/// spent or its only grants were corrections.
pub fn aggregate_balances<'a>(
    records: impl IntoIterator<Item = &'a GrantRecord>,
) -> Result<Balances, PointsOverflow> {
    let mut balances = Balances::new();
    for record in records {
        let balance = balances.entry(record.payer.clone()).or_insert(0);
        *balance = balance.checked_add(record.remainder).ok_or(PointsOverflow)?;
    }
    Ok(balances)
}
