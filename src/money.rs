//! Money Conversion Module
//!
//! Conversion between the engine's integer amounts and the decimal strings
//! operators type and read. All conversions MUST go through this module.
//!
//! ## Internal Representation
//! - Amounts are `u128` in the smallest unit of the route
//! - Atomic routes use nAVAX (9 decimals); direct EVM routes use wei (18)
//! - The scale factor is `10^decimals`
//!
//! ## Usage
//! ```rust
//! use hop_transfer::money::{format_amount, parse_amount};
//!
//! // Operator types "1.5" AVAX on a P -> X route
//! let internal = parse_amount("1.5", 9).unwrap();
//! assert_eq!(internal, 1_500_000_000);
//!
//! assert_eq!(format_amount(1_500_000_000, 9, 4), "1.5000");
//! ```

use rust_decimal::Decimal;
use thiserror::Error;

/// Money conversion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Convert an operator-supplied amount string to the smallest unit
///
/// # Errors
/// * `PrecisionOverflow` - more fractional digits than `decimals`
/// * `InvalidAmount` - zero or signed input
/// * `Overflow` - result does not fit `u128`
/// * `InvalidFormat` - anything that is not plain `digits[.digits]`
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<u128, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((_, rest)) if rest.contains('.') => {
            return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
        }
        Some(("", _)) => {
            return Err(MoneyError::InvalidFormat(
                "missing leading zero (e.g., use 0.5 instead of .5)".into(),
            ));
        }
        Some((_, "")) => {
            return Err(MoneyError::InvalidFormat(
                "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
            ));
        }
        Some(_) if decimals == 0 => {
            return Err(MoneyError::InvalidFormat("decimals is 0, but dot provided".into()));
        }
        Some(parts) => parts,
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in whole part: {}",
            whole
        )));
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat("invalid fractional part".into()));
    }

    // No silent truncation
    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let whole_num: u128 = whole.parse().map_err(|_| MoneyError::Overflow)?;
    let frac_num: u128 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = decimals as usize);
        frac_padded
            .parse()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let multiplier = 10u128
        .checked_pow(decimals)
        .ok_or(MoneyError::Overflow)?;
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}

/// Convert an internal amount to a display string, truncating to
/// `display_decimals`
pub fn format_amount(value: u128, decimals: u32, display_decimals: u32) -> String {
    match i128::try_from(value)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, decimals).ok())
    {
        Some(d) => format!("{:.prec$}", d, prec = display_decimals as usize),
        None => format_wide(value, decimals, display_decimals),
    }
}

/// Full precision string
pub fn format_amount_full(value: u128, decimals: u32) -> String {
    format_amount(value, decimals, decimals)
}

// Amounts beyond Decimal's 96-bit mantissa
fn format_wide(value: u128, decimals: u32, display_decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    if display_decimals == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", value % scale, width = decimals as usize);
    let mut shown: String = frac.chars().take(display_decimals as usize).collect();
    while shown.len() < display_decimals as usize {
        shown.push('0');
    }
    format!("{}.{}", whole, shown)
}
