use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::WalletService;
use crate::config::LedgerConfig;
use crate::domain::{
    Transaction, UserId, Wallet, format_amount, normalize_currency, parse_amount,
};
use crate::storage::SqliteWalletRepository;

const DEFAULT_CURRENCY: &str = "THB";

type Service = WalletService<SqliteWalletRepository>;

/// Tally - Custodial Wallet Ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Multi-currency user wallets with an append-only transaction journal")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "TALLY_DATABASE", default_value = "tally.db")]
    pub database: String,

    /// Bound on a single deposit, withdraw or transfer, in milliseconds
    #[arg(long, env = "TALLY_OP_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// How long a statement waits on a locked database, in milliseconds
    #[arg(long, env = "TALLY_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Maximum pooled database connections
    #[arg(long, env = "TALLY_MAX_CONNECTIONS", default_value_t = 8)]
    pub max_connections: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open an empty wallet for a user
    Open {
        /// User identifier
        user: String,

        /// Currency code (e.g., THB, USD)
        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,
    },

    /// Credit a user's wallet
    Deposit {
        /// User identifier
        user: String,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Caller reference (a UUID is generated when omitted)
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Debit a user's wallet
    Withdraw {
        /// User identifier
        user: String,

        /// Amount to withdraw (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Caller reference (a UUID is generated when omitted)
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Move funds between two users' wallets
    Transfer {
        /// Sending user
        from: String,

        /// Receiving user
        to: String,

        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Caller reference (a UUID is generated when omitted)
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// List all wallets of a user
    Wallets {
        user: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one wallet's balance
    Balance {
        user: String,

        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the transaction journal of a wallet
    History {
        user: String,

        #[arg(short, long, default_value = DEFAULT_CURRENCY)]
        currency: String,

        /// Maximum number of entries to show (newest kept)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Verify ledger integrity
    Check,
}

impl Cli {
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_operation_timeout(Duration::from_millis(self.timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        let service = match self.command {
            Commands::Init => WalletService::init(&config).await?,
            _ => WalletService::connect(&config).await.with_context(|| {
                format!(
                    "Cannot open database '{}'. Run 'tally init' first",
                    config.database_path
                )
            })?,
        };
        let result = run_command(&service, &config, self.command).await;
        service.close().await;
        result
    }
}

async fn run_command(service: &Service, config: &LedgerConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Database initialized: {}", config.database_path);
        }

        Commands::Open { user, currency } => {
            let wallet = service.open_wallet(&UserId::new(user), &currency).await?;
            println!("Opened {} wallet for {}", wallet.currency, wallet.user_id);
        }

        Commands::Deposit {
            user,
            amount,
            currency,
            reference,
        } => {
            let amount = parse_cli_amount(&amount)?;
            let reference = reference_or_new(reference);
            let wallet = service
                .deposit_money(&UserId::new(user), &currency, amount, &reference)
                .await?;
            println!(
                "Deposited into {} ({}). Balance: {} {}",
                wallet.user_id,
                reference,
                format_amount(wallet.balance),
                wallet.currency
            );
        }

        Commands::Withdraw {
            user,
            amount,
            currency,
            reference,
        } => {
            let amount = parse_cli_amount(&amount)?;
            let reference = reference_or_new(reference);
            let wallet = service
                .withdraw_money(&UserId::new(user), &currency, amount, &reference)
                .await?;
            println!(
                "Withdrew from {} ({}). Balance: {} {}",
                wallet.user_id,
                reference,
                format_amount(wallet.balance),
                wallet.currency
            );
        }

        Commands::Transfer {
            from,
            to,
            amount,
            currency,
            reference,
        } => {
            let amount = parse_cli_amount(&amount)?;
            let reference = reference_or_new(reference);
            let from = UserId::new(from);
            let to = UserId::new(to);
            service
                .transfer_money(&from, &to, &currency, amount, &reference)
                .await?;
            println!(
                "Transferred {} {} from {} to {} ({})",
                format_amount(amount),
                normalize_currency(&currency).unwrap_or(currency),
                from,
                to,
                reference
            );
        }

        Commands::Wallets { user, json } => {
            let wallets = service.get_user_wallets(&UserId::new(user)).await?;
            if json {
                print_json(&wallets)?;
            } else {
                print_wallets(&wallets);
            }
        }

        Commands::Balance {
            user,
            currency,
            json,
        } => {
            let wallet = service
                .get_wallet_balance(&UserId::new(user), &currency)
                .await?;
            if json {
                print_json(&wallet)?;
            } else {
                println!(
                    "{}: {} {}",
                    wallet.user_id,
                    format_amount(wallet.balance),
                    wallet.currency
                );
            }
        }

        Commands::History {
            user,
            currency,
            limit,
            json,
        } => {
            let entries = service
                .transaction_history(&UserId::new(user), &currency, limit)
                .await?;
            if json {
                print_json(&entries)?;
            } else {
                print_history(&entries);
            }
        }

        Commands::Check => run_check_command(service).await?,
    }
    Ok(())
}

fn parse_cli_amount(input: &str) -> Result<rust_decimal::Decimal> {
    parse_amount(input).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn reference_or_new(reference: Option<String>) -> String {
    reference.unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn print_wallets(wallets: &[Wallet]) {
    if wallets.is_empty() {
        println!("No wallets found.");
        return;
    }

    println!(
        "{:<6} {:<10} {:>14} {:>12} {:<6}",
        "ID", "CURRENCY", "BALANCE", "LOCKED", "ACTIVE"
    );
    println!("{}", "-".repeat(52));
    for wallet in wallets {
        println!(
            "{:<6} {:<10} {:>14} {:>12} {:<6}",
            wallet.id,
            wallet.currency,
            format_amount(wallet.balance),
            format_amount(wallet.amount_locked),
            if wallet.is_active { "yes" } else { "no" }
        );
    }
}

fn print_history(entries: &[Transaction]) {
    if entries.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:<6} {:<17} {:<13} {:>12} {:>14} {:<20} DESCRIPTION",
        "ID", "DATE", "TYPE", "AMOUNT", "BALANCE", "REFERENCE"
    );
    println!("{}", "-".repeat(100));
    for entry in entries {
        println!(
            "{:<6} {:<17} {:<13} {:>12} {:>14} {:<20} {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.transaction_type,
            format_amount(entry.delta()),
            format_amount(entry.balance_after),
            truncate(&entry.reference_id, 20),
            truncate(&entry.description, 30)
        );
    }
}

async fn run_check_command(service: &Service) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Wallets:      {}", report.wallet_count);
    println!("Transactions: {}", report.transaction_count);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
