mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{TestService, amount, balance, contended, funded_wallet, test_service_with, user};
use rust_decimal::Decimal;
use tally::LedgerError;
use tokio::task::JoinSet;

const BOUND: Duration = Duration::from_secs(60);

/// Run one operation, retrying from the top while the store reports contention.
async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LedgerError>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            result => return result,
        }
    }
}

async fn transfer_with_retry(
    service: Arc<TestService>,
    from: &'static str,
    to: &'static str,
    value: &'static str,
    reference: String,
) -> Result<(), LedgerError> {
    let (from, to, value) = (user(from), user(to), amount(value));
    with_retry(|| service.transfer_money(&from, &to, "THB", value, &reference)).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_complete_without_deadlock() -> Result<()> {
    let (service, _temp) = test_service_with(contended).await?;
    funded_wallet(&service, "alice", "THB", "1000.00").await?;
    funded_wallet(&service, "bob", "THB", "1000.00").await?;
    let service = Arc::new(service);

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        tasks.spawn(transfer_with_retry(
            service.clone(),
            "alice",
            "bob",
            "10.00",
            format!("ab-{}", i),
        ));
        tasks.spawn(transfer_with_retry(
            service.clone(),
            "bob",
            "alice",
            "5.00",
            format!("ba-{}", i),
        ));
    }

    let all_done = tokio::time::timeout(BOUND, async {
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.expect("transfer task panicked"));
        }
        results
    })
    .await
    .expect("transfers did not finish in time");

    assert_eq!(all_done.len(), 40);
    assert!(all_done.iter().all(|r| r.is_ok()), "{:?}", all_done);

    assert_eq!(balance(&service, "alice", "THB").await?, amount("900.00"));
    assert_eq!(balance(&service, "bob", "THB").await?, amount("1100.00"));

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service_with(contended).await?;
    funded_wallet(&service, "alice", "THB", "100.00").await?;
    let service = Arc::new(service);

    let mut tasks = JoinSet::new();
    for i in 0..25 {
        let service = service.clone();
        tasks.spawn(async move {
            let (alice, reference) = (user("alice"), format!("w-{}", i));
            with_retry(|| service.withdraw_money(&alice, "THB", amount("10.00"), &reference)).await
        });
    }

    let results = tokio::time::timeout(BOUND, async {
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.expect("withdraw task panicked"));
        }
        results
    })
    .await
    .expect("withdrawals did not finish in time");

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
        .count();
    assert_eq!(succeeded, 10);
    assert_eq!(refused, 15);

    assert_eq!(balance(&service, "alice", "THB").await?, Decimal::ZERO);
    let history = service
        .transaction_history(&user("alice"), "THB", None)
        .await?;
    assert_eq!(history.len(), 11);
    assert!(history.iter().all(|t| t.balance_after >= Decimal::ZERO));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_are_serialized() -> Result<()> {
    let (service, _temp) = test_service_with(contended).await?;
    funded_wallet(&service, "alice", "THB", "0").await?;
    let service = Arc::new(service);

    let mut tasks = JoinSet::new();
    for i in 0..30 {
        let service = service.clone();
        tasks.spawn(async move {
            let (alice, reference) = (user("alice"), format!("d-{}", i));
            with_retry(|| service.deposit_money(&alice, "THB", amount("1.50"), &reference)).await
        });
    }

    tokio::time::timeout(BOUND, async {
        while let Some(joined) = tasks.join_next().await {
            joined.expect("deposit task panicked").expect("deposit failed");
        }
    })
    .await
    .expect("deposits did not finish in time");

    assert_eq!(balance(&service, "alice", "THB").await?, amount("45.00"));

    // Every entry builds on the one before it
    let history = service
        .transaction_history(&user("alice"), "THB", None)
        .await?;
    assert_eq!(history.len(), 30);
    assert!(history.windows(2).all(|w| w[0].balance_after == w[1].balance_before));
    Ok(())
}
