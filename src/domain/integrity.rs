//! Audit of the stored ledger: balances against their journals, before/after
//! chains, and pairing of transfer legs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use rust_decimal::Decimal;

use super::{Transaction, TransactionId, TransactionType, Wallet, WalletId, replay_balance};

/// Everything the audit needs, read in one consistent view.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub wallets: Vec<Wallet>,
    /// All entries, ordered by id
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    NegativeBalance {
        wallet_id: WalletId,
    },
    BalanceMismatch {
        wallet_id: WalletId,
    },
    BrokenChain {
        wallet_id: WalletId,
        transaction_id: TransactionId,
    },
    InconsistentEntry {
        transaction_id: TransactionId,
    },
    OrphanEntry {
        transaction_id: TransactionId,
        wallet_id: WalletId,
    },
    UnpairedTransfer {
        reference_id: String,
    },
}

// Messages identify rows only; amounts and balances stay out of reports and logs.
impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::NegativeBalance { wallet_id } => {
                write!(f, "wallet {} has a negative balance", wallet_id)
            }
            IntegrityIssue::BalanceMismatch { wallet_id } => {
                write!(f, "wallet {} balance does not match its journal", wallet_id)
            }
            IntegrityIssue::BrokenChain {
                wallet_id,
                transaction_id,
            } => write!(
                f,
                "wallet {} journal breaks at transaction {}",
                wallet_id, transaction_id
            ),
            IntegrityIssue::InconsistentEntry { transaction_id } => write!(
                f,
                "transaction {} has an invalid amount or before/after pair",
                transaction_id
            ),
            IntegrityIssue::OrphanEntry {
                transaction_id,
                wallet_id,
            } => write!(
                f,
                "transaction {} references missing wallet {}",
                transaction_id, wallet_id
            ),
            IntegrityIssue::UnpairedTransfer { reference_id } => {
                write!(
                    f,
                    "transfer {} does not have exactly one matching out/in pair",
                    reference_id
                )
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub wallet_count: usize,
    pub transaction_count: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn build_integrity_report(snapshot: &LedgerSnapshot) -> IntegrityReport {
    let mut issues = Vec::new();

    let mut journals: HashMap<WalletId, Vec<Transaction>> = snapshot
        .wallets
        .iter()
        .map(|wallet| (wallet.id, Vec::new()))
        .collect();
    // BTreeMap keeps the report order stable
    let mut transfer_legs: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();

    for entry in &snapshot.transactions {
        if !entry.is_consistent() {
            issues.push(IntegrityIssue::InconsistentEntry {
                transaction_id: entry.id,
            });
        }

        match journals.get_mut(&entry.wallet_id) {
            Some(journal) => journal.push(entry.clone()),
            None => issues.push(IntegrityIssue::OrphanEntry {
                transaction_id: entry.id,
                wallet_id: entry.wallet_id,
            }),
        }

        if matches!(
            entry.transaction_type,
            TransactionType::TransferOut | TransactionType::TransferIn
        ) {
            transfer_legs
                .entry(entry.reference_id.as_str())
                .or_default()
                .push(entry);
        }
    }

    for wallet in &snapshot.wallets {
        if wallet.balance < Decimal::ZERO {
            issues.push(IntegrityIssue::NegativeBalance {
                wallet_id: wallet.id,
            });
        }

        let journal = journals.get(&wallet.id).map(Vec::as_slice).unwrap_or(&[]);

        let mut expected_before = Decimal::ZERO;
        for entry in journal {
            if entry.balance_before != expected_before {
                issues.push(IntegrityIssue::BrokenChain {
                    wallet_id: wallet.id,
                    transaction_id: entry.id,
                });
                break;
            }
            expected_before = entry.balance_after;
        }

        if replay_balance(journal) != Some(wallet.balance) {
            issues.push(IntegrityIssue::BalanceMismatch {
                wallet_id: wallet.id,
            });
        }
    }

    for (reference_id, legs) in transfer_legs {
        if !is_matched_pair(&legs) {
            issues.push(IntegrityIssue::UnpairedTransfer {
                reference_id: reference_id.to_string(),
            });
        }
    }

    IntegrityReport {
        wallet_count: snapshot.wallets.len(),
        transaction_count: snapshot.transactions.len(),
        issues,
    }
}

fn is_matched_pair(legs: &[&Transaction]) -> bool {
    match legs {
        [a, b] => {
            let (out, inn) = if a.transaction_type == TransactionType::TransferOut {
                (a, b)
            } else {
                (b, a)
            };
            out.transaction_type == TransactionType::TransferOut
                && inn.transaction_type == TransactionType::TransferIn
                && out.amount == inn.amount
                && out.wallet_id != inn.wallet_id
        }
        _ => false,
    }
}
