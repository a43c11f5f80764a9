//! User-supplied content filters.

use crate::domain::{DataPoint, Symbol};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("content filter failed: {0}")]
pub struct FilterError(pub String);

/// Decides whether a point reaches the strategy. An `Err` is reported and the
/// point is let through.
pub trait ContentFilter: Send + Sync {
    fn filter(&self, symbol: &Symbol, point: &DataPoint) -> Result<bool, FilterError>;
}

/// Passes everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ContentFilter for AcceptAll {
    fn filter(&self, _symbol: &Symbol, _point: &DataPoint) -> Result<bool, FilterError> {
        Ok(true)
    }
}

/// Filter from a closure.
pub struct FnFilter<F>(pub F);

impl<F> ContentFilter for FnFilter<F>
where
    F: Fn(&Symbol, &DataPoint) -> Result<bool, FilterError> + Send + Sync,
{
    fn filter(&self, symbol: &Symbol, point: &DataPoint) -> Result<bool, FilterError> {
        (self.0)(symbol, point)
    }
}

/// Drops price points whose value is not strictly positive. Auxiliary points always pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositivePriceFilter;

impl ContentFilter for PositivePriceFilter {
    fn filter(&self, _symbol: &Symbol, point: &DataPoint) -> Result<bool, FilterError> {
        if point.is_auxiliary() || !point.payload.is_price_data() {
            return Ok(true);
        }
        if point.value.is_nan() {
            return Err(FilterError(format!("NaN value at {}", point.end_time)));
        }
        Ok(point.value > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, TradeBar};
    use chrono::NaiveDate;

    fn point(close: f64) -> DataPoint {
        let t = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let bar = TradeBar { open: close, high: close, low: close, close, volume: 1.0 };
        DataPoint::new(Symbol::equity("SPY"), t, t, Payload::TradeBar(bar))
    }

    #[test]
    fn positive_price_filter() {
        let f = PositivePriceFilter;
        let spy = Symbol::equity("SPY");
        assert_eq!(f.filter(&spy, &point(1.0)), Ok(true));
        assert_eq!(f.filter(&spy, &point(0.0)), Ok(false));
        assert!(f.filter(&spy, &point(f64::NAN)).is_err());
    }

    #[test]
    fn closure_filter() {
        let f = FnFilter(|_: &Symbol, p: &DataPoint| Ok::<bool, FilterError>(p.value < 10.0));
        assert_eq!(f.filter(&Symbol::equity("SPY"), &point(5.0)), Ok(true));
        assert_eq!(f.filter(&Symbol::equity("SPY"), &point(50.0)), Ok(false));
    }
}
