use thiserror::Error;

use crate::domain::UserId;

/// Failures surfaced by the wallet ledger.
///
/// Messages name users, currencies and references but never amounts or
/// balances, so they are safe to hand to generic logging.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Wallet not found for user {user_id} ({currency})")]
    NotFound { user_id: UserId, currency: String },

    #[error("Insufficient balance in wallet of user {user_id} ({currency})")]
    InsufficientBalance { user_id: UserId, currency: String },

    #[error("Balance limit exceeded in wallet of user {user_id} ({currency})")]
    BalanceOverflow { user_id: UserId, currency: String },

    #[error("Invalid amount: must be greater than zero")]
    InvalidAmount,

    #[error("Cannot transfer to yourself")]
    SelfTransfer,

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("Wallet already exists for user {user_id} ({currency})")]
    WalletAlreadyExists { user_id: UserId, currency: String },

    #[error("Reference {reference_id} was already applied to the wallet of user {user_id} ({currency})")]
    DuplicateReference {
        reference_id: String,
        user_id: UserId,
        currency: String,
    },

    /// Lock contention, busy/locked store, pool exhaustion, I/O or an
    /// operation timeout. Retry from the top with the same reference.
    #[error("Transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error("Database error: {0}")]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn not_found(user_id: &UserId, currency: &str) -> Self {
        LedgerError::NotFound {
            user_id: user_id.clone(),
            currency: currency.to_string(),
        }
    }

    pub fn insufficient_balance(user_id: &UserId, currency: &str) -> Self {
        LedgerError::InsufficientBalance {
            user_id: user_id.clone(),
            currency: currency.to_string(),
        }
    }

    pub fn balance_overflow(user_id: &UserId, currency: &str) -> Self {
        LedgerError::BalanceOverflow {
            user_id: user_id.clone(),
            currency: currency.to_string(),
        }
    }

    pub fn wallet_already_exists(user_id: &UserId, currency: &str) -> Self {
        LedgerError::WalletAlreadyExists {
            user_id: user_id.clone(),
            currency: currency.to_string(),
        }
    }

    pub fn duplicate_reference(reference_id: &str, user_id: &UserId, currency: &str) -> Self {
        LedgerError::DuplicateReference {
            reference_id: reference_id.to_string(),
            user_id: user_id.clone(),
            currency: currency.to_string(),
        }
    }

    /// True when retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::TransientStoreFailure(_))
    }

    /// Classify a driver error: contention and connectivity become
    /// `TransientStoreFailure`, everything else is a permanent `Store` error.
    pub(crate) fn from_store(err: sqlx::Error, context: &'static str) -> Self {
        if is_transient(&err) {
            LedgerError::TransientStoreFailure(format!("{}: {}", context, err))
        } else {
            LedgerError::Store(anyhow::Error::new(err).context(context))
        }
    }
}

// SQLite primary result codes; extended codes carry them in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

/// Attach context to a driver result while classifying its error.
pub(crate) trait StoreContext<T> {
    fn store_context(self, context: &'static str) -> Result<T, LedgerError>;
}

impl<T> StoreContext<T> for Result<T, sqlx::Error> {
    fn store_context(self, context: &'static str) -> Result<T, LedgerError> {
        self.map_err(|err| LedgerError::from_store(err, context))
    }
}
