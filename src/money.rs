//! Money Conversion Module
//!
//! Conversion between the ledger's `Decimal` major-unit amounts and the
//! integer minor units that payment rails and the batch file speak.
//!
//! ## Rules
//! 1. The exponent of a currency is looked up here and nowhere else
//! 2. No silent truncation: extra fractional digits are an error
//! 3. Major-unit strings for rails are always rendered with two decimals

use rust_decimal::prelude::*;
use thiserror::Error;

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Precision overflow: {amount} has more than {max} decimals for {currency}")]
    PrecisionOverflow {
        amount: Decimal,
        currency: String,
        max: u32,
    },

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// Number of minor-unit digits for an ISO-4217 currency code.
pub fn currency_exponent(currency: &str) -> Result<u32, MoneyError> {
    let code = currency.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MoneyError::UnsupportedCurrency(currency.to_string()));
    }
    Ok(match code.as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    })
}

/// Convert a positive major-unit amount to minor units.
///
/// ```
/// use escrow_payouts::money::to_minor_units;
/// use rust_decimal::Decimal;
///
/// let amount = Decimal::new(10000, 2); // 100.00
/// assert_eq!(to_minor_units(amount, "USD").unwrap(), 10_000);
/// ```
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<u64, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }

    let exponent = currency_exponent(currency)?;
    let normalized = amount.normalize();
    if normalized.scale() > exponent {
        return Err(MoneyError::PrecisionOverflow {
            amount,
            currency: currency.to_string(),
            max: exponent,
        });
    }

    let factor = Decimal::from(10u64.pow(exponent));
    normalized
        .checked_mul(factor)
        .and_then(|scaled| scaled.trunc().to_u64())
        .ok_or(MoneyError::Overflow)
}

/// Render an amount in major units with exactly two decimals (e.g. `"100.00"`).
pub fn format_major_2dp(amount: Decimal, currency: &str) -> Result<String, MoneyError> {
    // Validates sign and precision before rendering.
    to_minor_units(amount, currency)?;
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    if rounded != amount {
        return Err(MoneyError::PrecisionOverflow {
            amount,
            currency: currency.to_string(),
            max: 2,
        });
    }
    rounded.rescale(2);
    Ok(rounded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_exponent() {
        assert_eq!(currency_exponent("USD").unwrap(), 2);
        assert_eq!(currency_exponent("usd").unwrap(), 2);
        assert_eq!(currency_exponent("JPY").unwrap(), 0);
        assert_eq!(currency_exponent("KWD").unwrap(), 3);
        assert!(currency_exponent("US").is_err());
        assert!(currency_exponent("U$D").is_err());
    }

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(Decimal::new(10000, 2), "USD").unwrap(), 10_000);
        assert_eq!(to_minor_units(Decimal::new(1, 0), "USD").unwrap(), 100);
        assert_eq!(to_minor_units(Decimal::new(1500, 0), "JPY").unwrap(), 1500);
        assert_eq!(to_minor_units(Decimal::new(1234, 3), "KWD").unwrap(), 1234);
        // Trailing zeros beyond the exponent are fine
        assert_eq!(to_minor_units(Decimal::new(12_3000, 4), "USD").unwrap(), 1230);
    }

    #[test]
    fn test_to_minor_units_rejects() {
        assert_eq!(
            to_minor_units(Decimal::ZERO, "USD"),
            Err(MoneyError::InvalidAmount)
        );
        assert_eq!(
            to_minor_units(Decimal::new(-5, 0), "USD"),
            Err(MoneyError::InvalidAmount)
        );
        assert!(matches!(
            to_minor_units(Decimal::new(1001, 3), "USD"),
            Err(MoneyError::PrecisionOverflow { max: 2, .. })
        ));
        assert!(matches!(
            to_minor_units(Decimal::new(15, 1), "JPY"),
            Err(MoneyError::PrecisionOverflow { max: 0, .. })
        ));
        assert_eq!(
            to_minor_units(Decimal::MAX, "USD"),
            Err(MoneyError::Overflow)
        );
    }

    #[test]
    fn test_format_major_2dp() {
        assert_eq!(format_major_2dp(Decimal::new(100, 0), "USD").unwrap(), "100.00");
        assert_eq!(format_major_2dp(Decimal::new(125, 1), "USD").unwrap(), "12.50");
        assert_eq!(format_major_2dp(Decimal::new(1999, 2), "USD").unwrap(), "19.99");
        assert!(format_major_2dp(Decimal::new(1, 3), "KWD").is_err());
    }
}
