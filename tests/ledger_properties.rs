use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use points_ledger::{
    adapters::database::sqlite::SqliteLedger,
    commands::{
        balances::BalancesRequest, grant::GrantRequest, spend::SpendRequest, DomainLogic, Error,
    },
    config::Config,
    domain::{Balances, Deduction, NewGrant, SpendAmount},
    ports::ledger::LedgerPort,
};
use rstest::*;
use speculoos::prelude::*;
use tempfile::TempDir;
use tower::{BoxError, ServiceExt};

struct Harness {
    _dir: TempDir,
    ledger: Arc<SqliteLedger>,
    domain: DomainLogic<SqliteLedger>,
}

impl Harness {
    async fn new(config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("points.db").display());
        let config = config.with_database_url(url);
        let ledger = Arc::new(SqliteLedger::connect(&config).await.unwrap());
        let domain = DomainLogic::new(ledger.clone(), Arc::new(config));
        Self {
            _dir: dir,
            ledger,
            domain,
        }
    }

    async fn grant(&self, payer: &str, points: i64, at: Option<DateTime<Utc>>) {
        self.domain
            .clone()
            .oneshot(GrantRequest {
                payer: payer.to_string(),
                points,
                timestamp: at,
            })
            .await
            .unwrap();
    }

    async fn spend(&self, points: i64) -> Result<Vec<Deduction>, Error> {
        self.domain
            .clone()
            .oneshot(SpendRequest { points })
            .await
            .map(|res| res.deductions)
    }

    async fn balances(&self) -> Balances {
        self.domain
            .clone()
            .oneshot(BalancesRequest)
            .await
            .unwrap()
            .balances
    }
}

#[fixture]
fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_604_000_000, 0).unwrap()
}

#[rstest]
#[tokio::test]
async fn test_fifo_order_across_payers(t0: DateTime<Utc>) {
    // GIVEN B's grant stored first but issued after A's
    let harness = Harness::new(Config::default()).await;
    harness
        .grant("B", 10, Some(t0 + Duration::seconds(2)))
        .await;
    harness.grant("A", 5, Some(t0 + Duration::seconds(1))).await;

    // WHEN spending 7
    let res = harness.spend(7).await;

    // THEN A is drained before B is touched
    assert_that!(res)
        .is_ok()
        .is_equal_to(vec![Deduction::new("A", -5), Deduction::new("B", -2)]);
    let balances = harness.balances().await;
    assert_that!(balances.get("A")).is_some().is_equal_to(&0);
    assert_that!(balances.get("B")).is_some().is_equal_to(&8);
}

#[rstest]
#[tokio::test]
async fn test_exact_exhaustion(t0: DateTime<Utc>) {
    let harness = Harness::new(Config::default()).await;
    harness.grant("A", 5, Some(t0)).await;

    let res = harness.spend(5).await;
    assert_that!(res)
        .is_ok()
        .is_equal_to(vec![Deduction::new("A", -5)]);

    let res = harness.spend(1).await;
    assert_that!(res)
        .is_err()
        .matches(|err| matches!(err, Error::InsufficientFunds { available: 0, .. }));
}

#[tokio::test]
async fn test_shortfall_is_atomic() {
    let harness = Harness::new(Config::default()).await;
    harness.grant("A", 5, None).await;

    let res = harness.spend(10).await;
    assert_that!(res).is_err().matches(|err| {
        matches!(
            err,
            Error::InsufficientFunds {
                requested: 10,
                available: 5
            }
        )
    });

    let balances = harness.balances().await;
    assert_that!(balances.get("A")).is_some().is_equal_to(&5);
}

#[tokio::test]
async fn test_negative_grant_clamps_to_zero() {
    let harness = Harness::new(Config::default()).await;
    harness.grant("A", -3, None).await;
    harness.grant("B", 4, None).await;

    let balances = harness.balances().await;
    assert_that!(balances.get("A")).is_some().is_equal_to(&0);

    let res = harness.spend(4).await;
    assert_that!(res)
        .is_ok()
        .is_equal_to(vec![Deduction::new("B", -4)]);
}

#[tokio::test]
async fn test_balance_read_is_idempotent() {
    let harness = Harness::new(Config::default()).await;
    harness.grant("DANNON", 300, None).await;
    harness.grant("UNILEVER", 200, None).await;
    harness.spend(350).await.unwrap();

    let first = harness.balances().await;
    let second = harness.balances().await;

    assert_that!(first).is_equal_to(second);
}

#[rstest]
#[case(vec![("DANNON", 1000), ("UNILEVER", 200), ("DANNON", -200), ("MILLER COORS", 10000), ("DANNON", 300)], vec![5000, 3000, 7000, 1])]
#[case(vec![("A", 1), ("B", 1), ("C", 1)], vec![2, 2, 1])]
#[case(vec![("A", -10), ("A", 10)], vec![10, 1])]
#[tokio::test]
async fn test_points_are_conserved(
    t0: DateTime<Utc>,
    #[case] grants: Vec<(&str, i64)>,
    #[case] spends: Vec<i64>,
) {
    // GIVEN a sequence of grants
    let harness = Harness::new(Config::default()).await;
    let mut granted = 0;
    for (i, (payer, points)) in grants.into_iter().enumerate() {
        harness
            .grant(payer, points, Some(t0 + Duration::seconds(i as i64)))
            .await;
        granted += points.max(0);
    }

    // WHEN spending, some of which may be rejected
    let mut spent = 0;
    for points in spends {
        if let Ok(deductions) = harness.spend(points).await {
            let total: i64 = deductions.iter().map(|d| -d.points).sum();
            assert_that!(total).is_equal_to(points);
            spent += total;
        }
    }

    // THEN balances account for every point and none is negative
    let balances = harness.balances().await;
    assert_that!(balances.values().all(|points| *points >= 0)).is_true();
    assert_that!(balances.values().sum::<i64>()).is_equal_to(granted - spent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spends_never_double_allocate() -> Result<(), BoxError> {
    // GIVEN a single grant of 10
    let harness = Harness::new(Config::default()).await;
    harness.grant("A", 10, None).await;

    // WHEN two spends of 6 race
    let first = tokio::spawn(harness.domain.clone().oneshot(SpendRequest { points: 6 }));
    let second = tokio::spawn(harness.domain.clone().oneshot(SpendRequest { points: 6 }));
    let results = [first.await?, second.await?];

    // THEN exactly one succeeds and the other sees the remaining 4
    let successes = results.iter().filter(|res| res.is_ok()).count();
    assert_that!(successes).is_equal_to(1);
    assert_that!(results.iter().any(|res| matches!(
        res,
        Err(Error::InsufficientFunds {
            requested: 6,
            available: 4
        })
    )))
    .is_true();

    let records = harness.ledger.grants().await?;
    assert_that!(records).has_length(1);
    assert_that!(records[0].remainder).is_equal_to(4);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_spends_drain_exactly() -> Result<(), BoxError> {
    let harness = Harness::new(Config::default()).await;
    for payer in ["A", "B", "C", "D"] {
        harness.grant(payer, 25, None).await;
    }

    let tasks: Vec<_> = (0..20)
        .map(|_| tokio::spawn(harness.domain.clone().oneshot(SpendRequest { points: 7 })))
        .collect();
    let mut successes = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => successes += 1,
            Err(Error::InsufficientFunds { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }

    // 100 points cover 14 spends of 7
    assert_that!(successes).is_equal_to(14);
    let balances = harness.balances().await;
    assert_that!(balances.values().sum::<i64>()).is_equal_to(2);

    Ok(())
}

#[rstest]
#[case(50)]
#[case(200)]
#[case(1_000)]
#[case(5_000)]
#[tokio::test]
async fn test_cancelled_spend_is_all_or_nothing(#[case] limit_us: u64) -> Result<(), BoxError> {
    // GIVEN a spend that touches hundreds of records
    let harness = Harness::new(Config::default()).await;
    for _ in 0..400 {
        harness.ledger.insert_grant(NewGrant::new("A", 1)).await?;
    }
    let amount = SpendAmount::try_from(300)?;

    // WHEN it is cancelled at some point before completing
    let limit = std::time::Duration::from_micros(limit_us);
    let res = tokio::time::timeout(limit, harness.ledger.spend(amount)).await;

    // THEN either every deduction landed or none did
    let remaining: i64 = harness.balances().await.values().sum();
    match res {
        Ok(deductions) => {
            assert_that!(deductions?).is_equal_to(vec![Deduction::new("A", -300)]);
            assert_that!(remaining).is_equal_to(100);
        }
        Err(_) => assert_that!(remaining == 400 || remaining == 100).is_true(),
    }

    // AND the write lock was released for the next spend
    let res = harness.spend(1).await;
    assert_that!(res)
        .is_ok()
        .is_equal_to(vec![Deduction::new("A", -1)]);
    let after: i64 = harness.balances().await.values().sum();
    assert_that!(after).is_equal_to(remaining - 1);

    Ok(())
}

#[tokio::test]
async fn test_locked_store_fails_without_deducting() -> Result<(), BoxError> {
    // GIVEN another writer holding the database lock
    let harness = Harness::new(Config {
        busy_timeout_ms: 50,
        ..Config::default()
    })
    .await;
    harness.grant("A", 5, None).await;
    let blocker = harness.ledger.pool().begin_with("BEGIN IMMEDIATE").await?;

    // WHEN spending
    let res = harness.spend(3).await;

    // THEN the spend is reported as retryable and nothing changed
    assert_that!(res)
        .is_err()
        .matches(|err| matches!(err, Error::StoreUnavailable(_)) && err.is_retryable());
    blocker.rollback().await?;
    let balances = harness.balances().await;
    assert_that!(balances.get("A")).is_some().is_equal_to(&5);

    Ok(())
}
