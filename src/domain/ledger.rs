use super::{Amount, Transaction, UserId};
use rust_decimal::Decimal;

/// Rank two users for lock acquisition.
///
/// A transfer must lock both wallets in this order whatever the direction of
/// the money, otherwise two opposite transfers between the same pair can each
/// hold one lock and wait forever on the other.
pub fn lock_order<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Rebuild a wallet balance from its audit trail.
/// Entries must belong to one wallet and be in insertion order.
/// `None` if the running balance leaves the decimal range.
pub fn replay_balance(entries: &[Transaction]) -> Option<Amount> {
    entries.iter().try_fold(Decimal::ZERO, |balance, entry| {
        entry.transaction_type.apply(balance, entry.amount)
    })
}

/// Balance snapshots after each entry, oldest first.
/// Stops at the first entry whose balance would overflow.
pub fn balance_history(entries: &[Transaction]) -> Vec<Amount> {
    entries
        .iter()
        .scan(Decimal::ZERO, |balance, entry| {
            *balance = entry.transaction_type.apply(*balance, entry.amount)?;
            Some(*balance)
        })
        .collect()
}
