//! Money Conversion Module
//!
//! Lossless conversion between ledger/client decimal strings and the
//! internal integer cent count. All arithmetic elsewhere in the crate is
//! done on [`Cents`]; decimal strings only exist at the boundaries.
//!
//! ## Internal Representation
//! - Amounts are `i64` cents (signed, debits are negative)
//! - Every currency on the ledger has exactly two fraction digits
//! - Values must stay strictly below [`MAX_SAFE_CENTS`] (2^53 - 1), the
//!   largest integer the ledger tooling represents exactly
//!
//! ## Usage
//! ```rust
//! use splitpay::money::{cents_to_decimal, decimal_to_cents};
//!
//! let cents = decimal_to_cents("12.50").unwrap();
//! assert_eq!(cents, 1250);
//! assert_eq!(cents_to_decimal(cents), "12.50");
//! ```

use rust_decimal::Decimal;
use thiserror::Error;

/// Integer number of cents.
pub type Cents = i64;

/// Largest exactly representable integer on the ledger side (2^53 - 1).
pub const MAX_SAFE_CENTS: Cents = 9_007_199_254_740_991;

/// Number of fraction digits for every ledger amount.
pub const FRACTION_DIGITS: usize = 2;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Expected exactly {expected} fraction digits, got {provided}")]
    FractionDigits { provided: usize, expected: usize },

    #[error("Amount {0} exceeds the safe integer bound")]
    Overflow(String),
}

// ============================================================================
// Parse: Decimal string → Cents
// ============================================================================

/// Convert a non-negative decimal string to cents.
///
/// Accepts `"12"` (implicit `.00`) or `"12.34"`. Anything else, including
/// `"12.3"`, `"12.345"`, `".5"`, `"+1.00"` or `"1e2"`, is rejected.
///
/// # Errors
/// * `InvalidFormat` - empty input, sign, non-digit characters, several dots
/// * `FractionDigits` - a dot followed by anything but two digits
/// * `Overflow` - value at or above [`MAX_SAFE_CENTS`]
pub fn decimal_to_cents(amount_str: &str) -> Result<Cents, MoneyError> {
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, "00"),
        Some((whole, frac)) => {
            if frac.contains('.') {
                return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
            }
            if frac.len() != FRACTION_DIGITS {
                return Err(MoneyError::FractionDigits {
                    provided: frac.len(),
                    expected: FRACTION_DIGITS,
                });
            }
            (whole, frac)
        }
    };

    if whole.is_empty() {
        return Err(MoneyError::InvalidFormat(
            "missing leading digit (e.g., use 0.50 instead of .50)".into(),
        ));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in whole part: {}",
            whole
        )));
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in fractional part: {}",
            frac
        )));
    }

    // Digits only from here on, so a parse failure can only be overflow
    let whole_num: i64 = whole
        .parse()
        .map_err(|_| MoneyError::Overflow(amount_str.to_string()))?;
    let frac_num: i64 = frac
        .parse()
        .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?;

    let cents = whole_num
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or_else(|| MoneyError::Overflow(amount_str.to_string()))?;

    ensure_safe(cents)
}

/// Same as [`decimal_to_cents`] but accepts a single leading `-`.
///
/// Ledger balances of the mutual-credit pool and its lower limit can be
/// negative.
pub fn signed_decimal_to_cents(amount_str: &str) -> Result<Cents, MoneyError> {
    match amount_str.strip_prefix('-') {
        Some(rest) => decimal_to_cents(rest).map(|c| -c),
        None => decimal_to_cents(amount_str),
    }
}

/// Reject values whose magnitude reaches the safe integer bound.
pub fn ensure_safe(cents: Cents) -> Result<Cents, MoneyError> {
    if cents.unsigned_abs() >= MAX_SAFE_CENTS as u64 {
        return Err(MoneyError::Overflow(cents.to_string()));
    }
    Ok(cents)
}

/// Returns true when `s` carries exactly two fraction digits after a dot.
///
/// Used to sanity check balances coming back from the ledger before any
/// comparison is made against them.
pub fn has_exact_fraction(s: &str) -> bool {
    matches!(s.split_once('.'), Some((_, frac)) if frac.len() == FRACTION_DIGITS)
}

// ============================================================================
// Format: Cents → Decimal string
// ============================================================================

/// Convert cents to a decimal string with exactly two fraction digits.
///
/// ```rust
/// use splitpay::money::cents_to_decimal;
/// assert_eq!(cents_to_decimal(5), "0.05");
/// assert_eq!(cents_to_decimal(-1250), "-12.50");
/// ```
pub fn cents_to_decimal(cents: Cents) -> String {
    let abs = cents.unsigned_abs();
    let formatted = format!("{}.{:02}", abs / 100, abs % 100);
    if cents < 0 {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Convert cents to a `rust_decimal::Decimal` scaled to two digits.
pub fn cents_to_rust_decimal(cents: Cents) -> Decimal {
    Decimal::new(cents, FRACTION_DIGITS as u32)
}

// ============================================================================
// Unit Tests
// ============================================================================
