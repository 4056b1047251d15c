mod common;

use anyhow::Result;
use common::{amount, funded_wallet, test_service, user};
use tally::{IntegrityIssue, balance_history, replay_balance};

#[tokio::test]
async fn test_mixed_workload_passes_integrity_check() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_wallet(&service, "alice", "THB", "100").await?;
    funded_wallet(&service, "bob", "THB", "0").await?;
    funded_wallet(&service, "bob", "USD", "5").await?;

    service
        .transfer_money(&user("alice"), &user("bob"), "THB", amount("25"), "t1")
        .await?;
    service
        .withdraw_money(&user("bob"), "THB", amount("5"), "w1")
        .await?;
    service
        .transfer_money(&user("bob"), &user("alice"), "THB", amount("20"), "t2")
        .await?;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    assert_eq!(report.wallet_count, 3);
    // 2 seeds + 2 transfer pairs + 1 withdraw
    assert_eq!(report.transaction_count, 7);

    Ok(())
}

#[tokio::test]
async fn test_history_replays_to_current_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_wallet(&service, "alice", "THB", "10.00").await?;
    funded_wallet(&service, "bob", "THB", "0").await?;
    service
        .withdraw_money(&user("alice"), "THB", amount("2.25"), "w1")
        .await?;
    service
        .transfer_money(&user("alice"), &user("bob"), "THB", amount("3"), "t1")
        .await?;

    let history = service
        .transaction_history(&user("alice"), "THB", None)
        .await?;
    let wallet = service.get_wallet_balance(&user("alice"), "THB").await?;

    assert_eq!(replay_balance(&history), Some(wallet.balance));
    assert_eq!(
        balance_history(&history),
        vec![amount("10.00"), amount("7.75"), amount("4.75")]
    );
    Ok(())
}

#[tokio::test]
async fn test_tampered_balance_is_reported() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_wallet(&service, "alice", "THB", "100").await?;
    let wallet = service.get_wallet_balance(&user("alice"), "THB").await?;

    sqlx::query("UPDATE wallets SET balance = '1000' WHERE id = ?")
        .bind(wallet.id)
        .execute(service.repository().pool())
        .await?;

    let report = service.check_integrity().await?;
    assert_eq!(
        report.issues,
        vec![IntegrityIssue::BalanceMismatch {
            wallet_id: wallet.id
        }]
    );
    Ok(())
}

#[tokio::test]
async fn test_journal_rows_are_append_only() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_wallet(&service, "alice", "THB", "100").await?;
    let pool = service.repository().pool();

    let update = sqlx::query("UPDATE transactions SET amount = '1'")
        .execute(pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM transactions").execute(pool).await;
    assert!(delete.is_err());

    let delete_wallet = sqlx::query("DELETE FROM wallets").execute(pool).await;
    assert!(delete_wallet.is_err());

    let history = service
        .transaction_history(&user("alice"), "THB", None)
        .await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, amount("100"));
    Ok(())
}

#[tokio::test]
async fn test_empty_ledger_is_healthy() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let report = service.check_integrity().await?;
    assert!(report.is_healthy());
    assert_eq!(report.wallet_count, 0);
    assert_eq!(report.transaction_count, 0);
    Ok(())
}
