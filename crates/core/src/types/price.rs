//! Type-safe price representation using decimal arithmetic.
//!
//! Catalog prices arrive in US dollars. The storefront displays and stores
//! them in a single display currency, converted with a fixed-point
//! [`ConversionRate`] that comes from configuration.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when building prices or conversion rates.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The conversion rate is zero or negative.
    #[error("conversion rate must be positive (got {0})")]
    NonPositiveRate(Decimal),
    /// The currency code is not supported.
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),
}

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., rand, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:.2}", self.currency_code.symbol(), self.amount)
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    ZAR,
}

impl CurrencyCode {
    /// Display symbol used as a price prefix.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
            Self::ZAR => "R",
        }
    }

    /// Three-letter ISO code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
            Self::ZAR => "ZAR",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            "ZAR" => Ok(Self::ZAR),
            _ => Err(PriceError::UnknownCurrency(s.to_string())),
        }
    }
}

/// Fixed multiplicative rate from the catalog currency to the display currency.
///
/// Converted amounts are rounded to two decimal places (banker's rounding,
/// the `rust_decimal` default) so stored prices are stable across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRate {
    from: CurrencyCode,
    to: CurrencyCode,
    rate: Decimal,
}

impl ConversionRate {
    /// Create a conversion rate.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::NonPositiveRate` if `rate <= 0`.
    pub fn new(from: CurrencyCode, to: CurrencyCode, rate: Decimal) -> Result<Self, PriceError> {
        if rate <= Decimal::ZERO {
            return Err(PriceError::NonPositiveRate(rate));
        }
        Ok(Self { from, to, rate })
    }

    /// A rate that leaves amounts unchanged.
    #[must_use]
    pub const fn identity(currency: CurrencyCode) -> Self {
        Self {
            from: currency,
            to: currency,
            rate: Decimal::ONE,
        }
    }

    /// Source (catalog) currency.
    #[must_use]
    pub const fn from_currency(&self) -> CurrencyCode {
        self.from
    }

    /// Target (display) currency.
    #[must_use]
    pub const fn to_currency(&self) -> CurrencyCode {
        self.to
    }

    /// The multiplicative rate.
    #[must_use]
    pub const fn rate(&self) -> Decimal {
        self.rate
    }

    /// Convert an amount in the source currency to the display currency.
    #[must_use]
    pub fn convert(&self, amount: Decimal) -> Decimal {
        (amount * self.rate).round_dp(2)
    }

    /// Convert an amount and tag it with the display currency.
    #[must_use]
    pub fn to_price(&self, amount: Decimal) -> Price {
        Price::new(self.convert(amount), self.to)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_price_display() {
        let price = Price::new(dec("185"), CurrencyCode::ZAR);
        assert_eq!(price.to_string(), "R185.00");

        let price = Price::new(dec("19.9"), CurrencyCode::USD);
        assert_eq!(price.to_string(), "$19.90");
    }

    #[test]
    fn test_currency_code_parse() {
        assert_eq!("zar".parse::<CurrencyCode>().unwrap(), CurrencyCode::ZAR);
        assert_eq!(" EUR ".parse::<CurrencyCode>().unwrap(), CurrencyCode::EUR);
        assert!(matches!(
            "XYZ".parse::<CurrencyCode>(),
            Err(PriceError::UnknownCurrency(_))
        ));
    }

    #[test]
    fn test_conversion_rate_rejects_non_positive() {
        assert!(matches!(
            ConversionRate::new(CurrencyCode::USD, CurrencyCode::ZAR, Decimal::ZERO),
            Err(PriceError::NonPositiveRate(_))
        ));
        assert!(ConversionRate::new(CurrencyCode::USD, CurrencyCode::ZAR, dec("-1")).is_err());
    }

    #[test]
    fn test_conversion_is_fixed_point() {
        let rate = ConversionRate::new(CurrencyCode::USD, CurrencyCode::ZAR, dec("18.5")).unwrap();
        assert_eq!(rate.convert(dec("109.95")), dec("2034.08"));
        assert_eq!(rate.convert(dec("10")), dec("185.00"));
        assert_eq!(rate.to_price(dec("8")).to_string(), "R148.00");
    }

    #[test]
    fn test_identity_rate() {
        let rate = ConversionRate::identity(CurrencyCode::USD);
        assert_eq!(rate.convert(dec("12.34")), dec("12.34"));
        assert_eq!(rate.from_currency(), rate.to_currency());
    }
}
