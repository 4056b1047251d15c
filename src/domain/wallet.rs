use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Amount;

pub type WalletId = i64;

/// Longest currency code accepted by the ledger.
pub const MAX_CURRENCY_LEN: usize = 10;

/// Opaque identifier of an authenticated user, as supplied by the identity provider.
///
/// Ordering is plain byte-wise string ordering; the repository relies on it to
/// rank wallets for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Normalize a currency code: trimmed, upper-cased, 1..=10 ASCII alphanumerics.
/// Returns `None` for anything else.
pub fn normalize_currency(input: &str) -> Option<String> {
    let code = input.trim();
    let valid = !code.is_empty()
        && code.len() <= MAX_CURRENCY_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| code.to_ascii_uppercase())
}

/// One balance per (user, currency).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: String,
    pub balance: Amount,
    /// Funds reserved for a future hold feature. No ledger operation reads or writes it.
    pub amount_locked: Amount,
    /// Persisted but not enforced by deposit/withdraw/transfer.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A freshly opened, empty wallet. The id is assigned by the repository.
    pub fn open(user_id: UserId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            currency: currency.into(),
            balance: Decimal::ZERO,
            amount_locked: Decimal::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_cover(&self, amount: Amount) -> bool {
        self.balance >= amount
    }

    /// Move the wallet to a new balance, stamping `updated_at`.
    pub fn with_balance(mut self, balance: Amount, at: DateTime<Utc>) -> Self {
        self.balance = balance;
        self.updated_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_wallet_is_empty_and_active() {
        let wallet = Wallet::open(UserId::from("alice"), "THB");
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.amount_locked, Decimal::ZERO);
        assert!(wallet.is_active);
        assert_eq!(wallet.currency, "THB");
    }

    #[test]
    fn test_can_cover_is_inclusive() {
        let wallet =
            Wallet::open("alice".into(), "THB").with_balance(Decimal::new(10000, 2), Utc::now());
        assert!(wallet.can_cover(Decimal::new(100, 0)));
        assert!(wallet.can_cover(Decimal::new(9999, 2)));
        assert!(!wallet.can_cover(Decimal::new(10001, 2)));
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency("thb"), Some("THB".to_string()));
        assert_eq!(normalize_currency("  usdt "), Some("USDT".to_string()));
        assert_eq!(normalize_currency(""), None);
        assert_eq!(normalize_currency("US D"), None);
        assert_eq!(normalize_currency("ABCDEFGHIJK"), None);
        assert_eq!(normalize_currency("€"), None);
    }

    #[test]
    fn test_user_ids_order_bytewise() {
        let mut users = vec![UserId::from("b"), UserId::from("B"), UserId::from("a")];
        users.sort();
        assert_eq!(users, vec![UserId::from("B"), UserId::from("a"), UserId::from("b")]);
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::from("u-1")).unwrap();
        assert_eq!(json, "\"u-1\"");
    }
}
