use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

use crate::application::LedgerError;
use crate::application::error::StoreContext;
use crate::config::LedgerConfig;
use crate::domain::{
    Amount, LedgerSnapshot, Transaction, TransactionStatus, TransactionType, UserId, Wallet,
    lock_order,
};

use super::{MIGRATION_001_INITIAL, WalletRepository};

const WALLET_COLUMNS: &str =
    "id, user_id, currency, balance, amount_locked, is_active, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, reference_id, transaction_type, amount, balance_before, balance_after, status, description, created_at, created_by";

/// `WalletRepository` backed by a SQLite database.
///
/// SQLite has no `SELECT ... FOR UPDATE`. A wallet is locked by a touching
/// `UPDATE ... RETURNING` issued before anything else in the transaction: the
/// first write takes the store's write lock and waits for it up to the busy
/// timeout, and the returned row is the balance every later write builds on.
pub struct SqliteWalletRepository {
    pool: SqlitePool,
}

impl SqliteWalletRepository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database described by `config`.
    /// The file is created only when `create_if_missing` is set.
    pub async fn connect(config: &LedgerConfig, create_if_missing: bool) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.operation_timeout)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database {}", config.database_path))?;

        info!(database = %config.database_path, "Connected to ledger store");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> anyhow::Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Ledger store closed");
    }

    /// The underlying pool, for maintenance queries that bypass the ledger rules.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Deposit and withdraw share one protocol: lock, check, write wallet, append entry.
    async fn post_single(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
        transaction_type: TransactionType,
        description: &str,
    ) -> Result<Wallet, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .store_context("Failed to begin transaction")?;

        let wallet = lock_wallet(&mut tx, user_id, currency)
            .await?
            .ok_or_else(|| LedgerError::not_found(user_id, currency))?;

        ensure_reference_unused(&mut tx, &wallet, reference_id, transaction_type).await?;

        if !transaction_type.is_credit() && !wallet.can_cover(amount) {
            return Err(LedgerError::insufficient_balance(user_id, currency));
        }

        let mut entry = Transaction::new(
            wallet.id,
            reference_id,
            transaction_type,
            amount,
            wallet.balance,
            user_id.clone(),
        )
        .ok_or_else(|| LedgerError::balance_overflow(user_id, currency))?
        .with_description(description);
        let wallet = wallet.with_balance(entry.balance_after, entry.created_at);

        save_balance(&mut tx, &wallet).await?;
        insert_transaction(&mut tx, &wallet, &mut entry).await?;

        tx.commit().await.store_context("Failed to commit transaction")?;

        info!(
            wallet_id = wallet.id,
            transaction_id = entry.id,
            kind = %transaction_type,
            "Wallet posting committed"
        );
        Ok(wallet)
    }
}

#[async_trait]
impl WalletRepository for SqliteWalletRepository {
    #[instrument(skip_all, fields(user = %user_id))]
    async fn get_wallets_by_user(&self, user_id: &UserId) -> Result<Vec<Wallet>, LedgerError> {
        let query = format!(
            "SELECT {} FROM wallets WHERE user_id = ? ORDER BY currency",
            WALLET_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .store_context("Failed to list wallets")?;

        Ok(rows.iter().map(row_to_wallet).collect::<anyhow::Result<_>>()?)
    }

    #[instrument(skip_all, fields(user = %user_id, currency = %currency))]
    async fn get_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet, LedgerError> {
        fetch_wallet(&self.pool, user_id, currency)
            .await?
            .ok_or_else(|| LedgerError::not_found(user_id, currency))
    }

    #[instrument(skip_all, fields(user = %user_id, currency = %currency))]
    async fn open_wallet(&self, user_id: &UserId, currency: &str) -> Result<Wallet, LedgerError> {
        let mut wallet = Wallet::open(user_id.clone(), currency);

        let result = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, currency, balance, amount_locked, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(wallet.user_id.as_str())
        .bind(&wallet.currency)
        .bind(wallet.balance.to_string())
        .bind(wallet.amount_locked.to_string())
        .bind(wallet.is_active)
        .bind(wallet.created_at.to_rfc3339())
        .bind(wallet.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                wallet.id = row.get("id");
                info!(wallet_id = wallet.id, "Wallet opened");
                Ok(wallet)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(LedgerError::wallet_already_exists(user_id, currency))
            }
            Err(err) => Err(LedgerError::from_store(err, "Failed to open wallet")),
        }
    }

    #[instrument(skip(self, amount))]
    async fn deposit(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError> {
        self.post_single(
            user_id,
            currency,
            amount,
            reference_id,
            TransactionType::Deposit,
            "Deposit via API",
        )
        .await
    }

    #[instrument(skip(self, amount))]
    async fn withdraw(
        &self,
        user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<Wallet, LedgerError> {
        self.post_single(
            user_id,
            currency,
            amount,
            reference_id,
            TransactionType::Withdraw,
            "Withdraw via API",
        )
        .await
    }

    #[instrument(skip(self, amount))]
    async fn transfer(
        &self,
        from_user_id: &UserId,
        to_user_id: &UserId,
        currency: &str,
        amount: Amount,
        reference_id: &str,
    ) -> Result<(), LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .store_context("Failed to begin transaction")?;

        // Lock in user order, never in sender/receiver order.
        let (first_id, second_id) = lock_order(from_user_id, to_user_id);

        let first = lock_wallet(&mut tx, first_id, currency)
            .await?
            .ok_or_else(|| LedgerError::not_found(first_id, currency))?;
        let second = lock_wallet(&mut tx, second_id, currency)
            .await?
            .ok_or_else(|| LedgerError::not_found(second_id, currency))?;
        debug!(first = %first_id, second = %second_id, "Transfer wallets locked");

        let (sender, receiver) = if from_user_id == first_id {
            (first, second)
        } else {
            (second, first)
        };

        ensure_transfer_reference_unused(&mut tx, reference_id, from_user_id, currency).await?;

        if !sender.can_cover(amount) {
            return Err(LedgerError::insufficient_balance(from_user_id, currency));
        }

        let mut debit = Transaction::new(
            sender.id,
            reference_id,
            TransactionType::TransferOut,
            amount,
            sender.balance,
            from_user_id.clone(),
        )
        .ok_or_else(|| LedgerError::balance_overflow(from_user_id, currency))?
        .with_description(format!("Transfer to {}", to_user_id));
        let mut credit = Transaction::new(
            receiver.id,
            reference_id,
            TransactionType::TransferIn,
            amount,
            receiver.balance,
            from_user_id.clone(),
        )
        .ok_or_else(|| LedgerError::balance_overflow(to_user_id, currency))?
        .with_description(format!("Transfer from {}", from_user_id));

        let sender = sender.with_balance(debit.balance_after, debit.created_at);
        let receiver = receiver.with_balance(credit.balance_after, credit.created_at);

        save_balance(&mut tx, &sender).await?;
        save_balance(&mut tx, &receiver).await?;
        insert_transaction(&mut tx, &sender, &mut debit).await?;
        insert_transaction(&mut tx, &receiver, &mut credit).await?;

        tx.commit().await.store_context("Failed to commit transfer")?;

        info!(
            sender_wallet = sender.id,
            receiver_wallet = receiver.id,
            debit_id = debit.id,
            credit_id = credit.id,
            "Transfer committed"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(user = %user_id, currency = %currency))]
    async fn list_transactions(
        &self,
        user_id: &UserId,
        currency: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let wallet = self.get_wallet(user_id, currency).await?;

        // LIMIT -1 means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let query = format!(
            "SELECT {cols} FROM (SELECT {cols} FROM transactions WHERE wallet_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id",
            cols = TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(wallet.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .store_context("Failed to list transactions")?;

        Ok(rows.iter().map(row_to_transaction).collect::<anyhow::Result<_>>()?)
    }

    #[instrument(skip_all)]
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        // Both reads share one transaction so they see the same committed state.
        let mut tx = self
            .pool
            .begin()
            .await
            .store_context("Failed to begin snapshot")?;

        let wallet_rows = sqlx::query(&format!("SELECT {} FROM wallets ORDER BY id", WALLET_COLUMNS))
            .fetch_all(&mut *tx)
            .await
            .store_context("Failed to read wallets")?;
        let transaction_rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY id",
            TRANSACTION_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await
        .store_context("Failed to read transactions")?;

        tx.commit().await.store_context("Failed to end snapshot")?;

        Ok(LedgerSnapshot {
            wallets: wallet_rows
                .iter()
                .map(row_to_wallet)
                .collect::<anyhow::Result<_>>()?,
            transactions: transaction_rows
                .iter()
                .map(row_to_transaction)
                .collect::<anyhow::Result<_>>()?,
        })
    }
}

// ========================
// Unit-of-work helpers
// ========================

/// Take the exclusive lock on a wallet row and return it as of lock time.
/// `None` when the wallet does not exist.
async fn lock_wallet(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    currency: &str,
) -> Result<Option<Wallet>, LedgerError> {
    let query = format!(
        "UPDATE wallets SET updated_at = updated_at WHERE user_id = ? AND currency = ? RETURNING {}",
        WALLET_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(user_id.as_str())
        .bind(currency)
        .fetch_optional(&mut *conn)
        .await
        .store_context("Failed to lock wallet")?;

    Ok(row.as_ref().map(row_to_wallet).transpose()?)
}

async fn fetch_wallet(
    pool: &SqlitePool,
    user_id: &UserId,
    currency: &str,
) -> Result<Option<Wallet>, LedgerError> {
    let query = format!(
        "SELECT {} FROM wallets WHERE user_id = ? AND currency = ?",
        WALLET_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(user_id.as_str())
        .bind(currency)
        .fetch_optional(pool)
        .await
        .store_context("Failed to fetch wallet")?;

    Ok(row.as_ref().map(row_to_wallet).transpose()?)
}

async fn ensure_reference_unused(
    conn: &mut SqliteConnection,
    wallet: &Wallet,
    reference_id: &str,
    transaction_type: TransactionType,
) -> Result<(), LedgerError> {
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM transactions
        WHERE wallet_id = ? AND reference_id = ? AND transaction_type = ?
        LIMIT 1
        "#,
    )
    .bind(wallet.id)
    .bind(reference_id)
    .bind(transaction_type.as_str())
    .fetch_optional(&mut *conn)
    .await
    .store_context("Failed to check reference")?;

    match existing {
        Some(_) => Err(LedgerError::duplicate_reference(
            reference_id,
            &wallet.user_id,
            &wallet.currency,
        )),
        None => Ok(()),
    }
}

/// Transfer references are ledger-wide: one reference, one out/in pair.
async fn ensure_transfer_reference_unused(
    conn: &mut SqliteConnection,
    reference_id: &str,
    from_user_id: &UserId,
    currency: &str,
) -> Result<(), LedgerError> {
    let existing: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM transactions
        WHERE reference_id = ? AND transaction_type IN ('TRANSFER_OUT', 'TRANSFER_IN')
        LIMIT 1
        "#,
    )
    .bind(reference_id)
    .fetch_optional(&mut *conn)
    .await
    .store_context("Failed to check transfer reference")?;

    match existing {
        Some(_) => Err(LedgerError::duplicate_reference(
            reference_id,
            from_user_id,
            currency,
        )),
        None => Ok(()),
    }
}

async fn save_balance(conn: &mut SqliteConnection, wallet: &Wallet) -> Result<(), LedgerError> {
    sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
        .bind(wallet.balance.to_string())
        .bind(wallet.updated_at.to_rfc3339())
        .bind(wallet.id)
        .execute(&mut *conn)
        .await
        .store_context("Failed to save wallet balance")?;
    Ok(())
}

/// Append a journal entry, assigning its id.
async fn insert_transaction(
    conn: &mut SqliteConnection,
    wallet: &Wallet,
    entry: &mut Transaction,
) -> Result<(), LedgerError> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (wallet_id, reference_id, transaction_type, amount, balance_before, balance_after, status, description, created_at, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(entry.wallet_id)
    .bind(&entry.reference_id)
    .bind(entry.transaction_type.as_str())
    .bind(entry.amount.to_string())
    .bind(entry.balance_before.to_string())
    .bind(entry.balance_after.to_string())
    .bind(entry.status.as_str())
    .bind(&entry.description)
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.created_by.as_str())
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(row) => {
            entry.id = row.get("id");
            Ok(())
        }
        Err(err) if is_unique_violation(&err) => Err(LedgerError::duplicate_reference(
            &entry.reference_id,
            &wallet.user_id,
            &wallet.currency,
        )),
        Err(err) => Err(LedgerError::from_store(err, "Failed to save transaction")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// ========================
// Row mapping
// ========================

fn row_to_wallet(row: &SqliteRow) -> anyhow::Result<Wallet> {
    let user_id: String = row.get("user_id");

    Ok(Wallet {
        id: row.get("id"),
        user_id: UserId::new(user_id),
        currency: row.get("currency"),
        balance: decimal_column(row, "balance")?,
        amount_locked: decimal_column(row, "amount_locked")?,
        is_active: row.get::<i32, _>("is_active") != 0,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> anyhow::Result<Transaction> {
    let type_str: String = row.get("transaction_type");
    let status_str: String = row.get("status");
    let created_by: String = row.get("created_by");

    Ok(Transaction {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        reference_id: row.get("reference_id"),
        transaction_type: TransactionType::from_str(&type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
        amount: decimal_column(row, "amount")?,
        balance_before: decimal_column(row, "balance_before")?,
        balance_after: decimal_column(row, "balance_after")?,
        status: TransactionStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
        description: row.get("description"),
        created_at: timestamp_column(row, "created_at")?,
        created_by: UserId::new(created_by),
    })
}

fn decimal_column(row: &SqliteRow, column: &str) -> anyhow::Result<Decimal> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in column {}", column))
}

fn timestamp_column(row: &SqliteRow, column: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Invalid timestamp in column {}", column))?
        .with_timezone(&Utc))
}
