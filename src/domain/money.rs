use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

/// Money is an exact decimal. Floating point never touches a balance.
pub type Amount = Decimal;

/// Format an amount as a human-readable string with at least two decimal places.
/// Example: 100 -> "100.00", 12.345 -> "12.345", -5 -> "-5.00"
pub fn format_amount(amount: Amount) -> String {
    let mut value = amount.normalize();
    if value.scale() < 2 {
        value.rescale(2);
    }
    value.to_string()
}

/// Parse a plain decimal string into an exact amount.
/// Example: "50.00" -> 50.00, "12.5" -> 12.5, "100" -> 100
///
/// The sign is preserved; the wallet service rejects non-positive amounts.
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }
    if input.contains(['e', 'E']) {
        return Err(ParseAmountError::InvalidFormat);
    }
    Decimal::from_str(input).map_err(|_| ParseAmountError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    Empty,
    InvalidFormat,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::Empty => write!(f, "empty amount"),
            ParseAmountError::InvalidFormat => write!(f, "invalid money format"),
        }
    }
}

impl std::error::Error for ParseAmountError {}
