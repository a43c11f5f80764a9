//! Instrument identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset class of an instrument. Drives the on-disk data layout and which
/// normalization modes are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityType {
    Equity,
    Forex,
    Crypto,
    Future,
    Index,
    /// User-defined data that is not tied to a listed instrument.
    Custom,
}

impl SecurityType {
    /// Folder name used in the data layout (`equity`, `forex`, ...).
    pub fn folder(&self) -> &'static str {
        match self {
            SecurityType::Equity => "equity",
            SecurityType::Forex => "forex",
            SecurityType::Crypto => "crypto",
            SecurityType::Future => "future",
            SecurityType::Index => "index",
            SecurityType::Custom => "custom",
        }
    }

    /// Multiplier between stored integer prices and real prices.
    ///
    /// Equity files store prices as deci-cents.
    pub fn price_multiplier(&self) -> f64 {
        match self {
            SecurityType::Equity => 10_000.0,
            _ => 1.0,
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

/// Permanent identity of an instrument.
///
/// `ticker` is the ticker the security first listed under. It never changes
/// when the security is renamed; the ticker in force on a given date is the
/// *mapped* ticker, tracked on the subscription config.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub security_type: SecurityType,
    pub market: String,
}

impl Symbol {
    pub fn new(ticker: impl Into<String>, security_type: SecurityType, market: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into().to_uppercase(),
            security_type,
            market: market.into().to_lowercase(),
        }
    }

    /// US equity shorthand.
    pub fn equity(ticker: impl Into<String>) -> Self {
        Self::new(ticker, SecurityType::Equity, "usa")
    }

    /// Custom data symbol.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(name, SecurityType::Custom, "custom")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.ticker, self.security_type, self.market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_normalizes_case() {
        let sym = Symbol::new("spy", SecurityType::Equity, "USA");
        assert_eq!(sym.ticker, "SPY");
        assert_eq!(sym.market, "usa");
        assert_eq!(sym, Symbol::equity("SPY"));
    }

    #[test]
    fn symbols_order_deterministically() {
        let mut syms = vec![Symbol::equity("MSFT"), Symbol::equity("AAPL")];
        syms.sort();
        assert_eq!(syms[0].ticker, "AAPL");
    }
}
