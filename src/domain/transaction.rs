use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, UserId, WalletId};

pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds entering the wallet from outside the ledger
    Deposit,
    /// Funds leaving the wallet to outside the ledger
    Withdraw,
    /// Debit leg of a transfer, written on the sender's wallet
    TransferOut,
    /// Credit leg of a transfer, written on the receiver's wallet
    TransferIn,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::TransferOut => "TRANSFER_OUT",
            TransactionType::TransferIn => "TRANSFER_IN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAW" => Some(TransactionType::Withdraw),
            "TRANSFER_OUT" => Some(TransactionType::TransferOut),
            "TRANSFER_IN" => Some(TransactionType::TransferIn),
            _ => None,
        }
    }

    /// True when this entry increases the wallet balance.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::TransferIn)
    }

    /// Apply this entry's sign convention to a balance.
    /// `None` when the result falls outside the decimal range.
    pub fn apply(&self, balance: Amount, amount: Amount) -> Option<Amount> {
        if self.is_credit() {
            balance.checked_add(amount)
        } else {
            balance.checked_sub(amount)
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(TransactionStatus::Completed),
            _ => None,
        }
    }
}

/// An immutable ledger entry: one per wallet mutation.
/// A transfer writes two of them that share a `reference_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    /// Caller-supplied correlation token, also the idempotency key per wallet and type
    pub reference_id: String,
    pub transaction_type: TransactionType,
    /// Always positive; the direction comes from `transaction_type`
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub status: TransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// The user whose request produced the entry
    pub created_by: UserId,
}

impl Transaction {
    /// Create an entry from the balance observed under the wallet lock.
    /// `balance_after` is derived; the id is assigned by the repository.
    /// Returns `None` if `balance_after` would overflow.
    pub fn new(
        wallet_id: WalletId,
        reference_id: impl Into<String>,
        transaction_type: TransactionType,
        amount: Amount,
        balance_before: Amount,
        created_by: UserId,
    ) -> Option<Self> {
        let balance_after = transaction_type.apply(balance_before, amount)?;

        Some(Self {
            id: 0, // Will be set by repository
            wallet_id,
            reference_id: reference_id.into(),
            transaction_type,
            amount,
            balance_before,
            balance_after,
            status: TransactionStatus::Completed,
            description: String::new(),
            created_at: Utc::now(),
            created_by,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Signed effect on the wallet balance.
    pub fn delta(&self) -> Amount {
        self.balance_after - self.balance_before
    }

    /// Amount is positive and before/after agree with the sign convention.
    pub fn is_consistent(&self) -> bool {
        self.amount > Decimal::ZERO
            && self.transaction_type.apply(self.balance_before, self.amount) == Some(self.balance_after)
    }
}
