use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    Amount, IntegrityReport, Transaction, UserId, Wallet, build_integrity_report,
    normalize_currency,
};
use crate::storage::{SqliteWalletRepository, WalletRepository};

use super::LedgerError;

/// Business-rule gate in front of a `WalletRepository`.
/// This is the primary interface for any client (CLI, API, etc.).
///
/// Every rejection here happens before the store is touched. Mutations are
/// bounded by the operation timeout. An expired unit of work is dropped; if the
/// deadline hit after commit was sent, the write may still have landed, so
/// callers retry with the same reference.
pub struct WalletService<R> {
    repo: R,
    operation_timeout: Duration,
}

impl WalletService<SqliteWalletRepository> {
    /// Initialize a new database at the configured path.
    pub async fn init(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = SqliteWalletRepository::init(config).await?;
        Ok(Self::new(repo).with_operation_timeout(config.operation_timeout))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = SqliteWalletRepository::connect(config, false).await?;
        Ok(Self::new(repo).with_operation_timeout(config.operation_timeout))
    }

    pub async fn close(&self) {
        self.repo.close().await;
    }
}

impl<R: WalletRepository> WalletService<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            operation_timeout: LedgerConfig::default().operation_timeout,
        }
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    // ========================
    // Wallet operations
    // ========================

    /// Open an empty wallet for a user, e.g. at account registration.
    pub async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet, LedgerError> {
        let currency = currency_code(currency)?;
        self.repo.open_wallet(user_id, &currency).await
    }

    pub async fn get_user_wallets(&self, user_id: &UserId) -> Result<Vec<Wallet>, LedgerError> {
        self.repo.get_wallets_by_user(user_id).await
    }

    pub async fn get_wallet_balance(
        &self,
        user_id: &UserId,
        currency: &str,
    ) -> Result<Wallet, LedgerError> {
        let currency = currency_code(currency)?;
        self.repo.get_wallet(user_id, &currency).await
    }

    // ========================
    // Money movement
    // ========================

    pub async fn deposit_money(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError> {
        ensure_positive(amount)?;
        let currency = currency_code(currency)?;

        self.bounded(
            "deposit",
            self.repo.deposit(user_id, &currency, amount, reference_id),
        )
        .await
        .inspect_err(|err| {
            warn!(
                user = %user_id,
                currency = %currency,
                reference_id,
                error = %err,
                "Deposit failed"
            )
        })
    }

    pub async fn withdraw_money(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError> {
        ensure_positive(amount)?;
        let currency = currency_code(currency)?;

        self.bounded(
            "withdraw",
            self.repo.withdraw(user_id, &currency, amount, reference_id),
        )
        .await
        .inspect_err(|err| {
            warn!(
                user = %user_id,
                currency = %currency,
                reference_id,
                error = %err,
                "Withdraw failed"
            )
        })
    }

    pub async fn transfer_money(
        &self,
        from_user_id: &UserId,
        to_user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<(), LedgerError> {
        if from_user_id == to_user_id {
            return Err(LedgerError::SelfTransfer);
        }
        ensure_positive(amount)?;
        let currency = currency_code(currency)?;

        self.bounded(
            "transfer",
            self.repo
                .transfer(from_user_id, to_user_id, &currency, amount, reference_id),
        )
        .await
        .inspect_err(|err| {
            warn!(
                from = %from_user_id,
                to = %to_user_id,
                currency = %currency,
                reference_id,
                error = %err,
                "Transfer failed"
            )
        })
    }

    // ========================
    // Audit
    // ========================

    /// Journal of one wallet, oldest first. `limit` keeps only the newest entries.
    pub async fn transaction_history(
        &self,
        user_id: &UserId,
        currency: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let currency = currency_code(currency)?;
        self.repo.list_transactions(user_id, &currency, limit).await
    }

    /// Cross-check every wallet balance against its journal.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let snapshot = self.repo.snapshot().await?;
        let report = build_integrity_report(&snapshot);
        debug!(
            wallets = report.wallet_count,
            transactions = report.transaction_count,
            issues = report.issues.len(),
            "Integrity check finished"
        );
        Ok(report)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.operation_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::TransientStoreFailure(format!(
                "{} timed out after {:?}; outcome unknown, retry with the same reference",
                operation, self.operation_timeout
            ))),
        }
    }
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn currency_code(currency: &str) -> Result<String, LedgerError> {
    normalize_currency(currency).ok_or_else(|| LedgerError::InvalidCurrency(currency.to_string()))
}
