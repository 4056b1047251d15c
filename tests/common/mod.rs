// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tally::{LedgerConfig, SqliteWalletRepository, UserId, WalletService};
use tempfile::TempDir;

pub type TestService = WalletService<SqliteWalletRepository>;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(TestService, TempDir)> {
    test_service_with(|config| config).await
}

/// Same as `test_service`, with the config adjusted before connecting
pub async fn test_service_with(
    adjust: impl FnOnce(LedgerConfig) -> LedgerConfig,
) -> Result<(TestService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = adjust(LedgerConfig::new(db_path.to_str().unwrap()));
    let service = WalletService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Generous limits for tests that pile many writers onto one file
pub fn contended(config: LedgerConfig) -> LedgerConfig {
    config
        .with_busy_timeout(Duration::from_secs(30))
        .with_operation_timeout(Duration::from_secs(30))
}

pub fn amount(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn user(id: &str) -> UserId {
    UserId::from(id)
}

/// Open a wallet and, for a positive amount, seed it with one deposit
pub async fn funded_wallet(
    service: &TestService,
    user_id: &str,
    currency: &str,
    initial: &str,
) -> Result<()> {
    let user_id = user(user_id);
    service.open_wallet(&user_id, currency).await?;
    let initial = amount(initial);
    if initial > Decimal::ZERO {
        service
            .deposit_money(&user_id, currency, initial, &format!("seed-{}", user_id))
            .await?;
    }
    Ok(())
}

pub async fn balance(service: &TestService, user_id: &str, currency: &str) -> Result<Decimal> {
    Ok(service
        .get_wallet_balance(&user(user_id), currency)
        .await?
        .balance)
}
