use async_trait::async_trait;

use crate::application::LedgerError;
use crate::domain::{Amount, LedgerSnapshot, Transaction, UserId, Wallet};

/// Capability interface over the ledger store.
///
/// Implementations are the only writers of wallet and transaction rows. Each
/// mutating call is one atomic unit of work: it either commits every write or
/// none. Amount validation is the caller's job; see `WalletService`.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// All wallets of a user, ordered by currency. Empty when the user has none.
    async fn get_wallets_by_user(&self, user_id: &UserId) -> Result<Vec<Wallet>, LedgerError>;

    async fn get_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet, LedgerError>;

    /// Open an empty wallet. Fails with `WalletAlreadyExists` on a taken (user, currency).
    async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet, LedgerError>;

    async fn deposit(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError>;

    async fn withdraw(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError>;

    /// Move funds between two distinct users' wallets of the same currency.
    async fn transfer(
        &self,
        from_user_id: &UserId,
        to_user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<(), LedgerError>;

    /// Journal of one wallet, oldest first, truncated to the newest `limit` entries.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        currency: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// All wallets and entries, read in a single consistent view.
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError>;
}
