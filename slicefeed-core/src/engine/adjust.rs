//! Price and volume normalization.
//!
//! Pure functions of (mode, factors). Forward transforms:
//!
//! | mode           | price                          |
//! |----------------|--------------------------------|
//! | Raw            | p                              |
//! | SplitAdjusted  | p * split_factor               |
//! | TotalReturn    | p * split_factor + dividend_sum|
//! | Adjusted       | p * price_scale_factor         |
//!
//! Sizes are divided by the split factor in every mode but Raw. The inverse
//! transforms undo exactly these, so a raw close can be recovered from an
//! emitted one with the factors that were in force when it was emitted.

use crate::data::FactorFile;
use crate::domain::{AdjustmentFactors, DataPoint, NormalizationMode};
use chrono::NaiveDate;

pub fn adjust_price(price: f64, mode: NormalizationMode, f: &AdjustmentFactors) -> f64 {
    match mode {
        NormalizationMode::Raw => price,
        NormalizationMode::SplitAdjusted => price * f.split_factor,
        NormalizationMode::TotalReturn => price * f.split_factor + f.dividend_sum,
        NormalizationMode::Adjusted => price * f.price_scale_factor,
    }
}

pub fn unadjust_price(price: f64, mode: NormalizationMode, f: &AdjustmentFactors) -> f64 {
    match mode {
        NormalizationMode::Raw => price,
        NormalizationMode::SplitAdjusted => price / f.split_factor,
        NormalizationMode::TotalReturn => (price - f.dividend_sum) / f.split_factor,
        NormalizationMode::Adjusted => price / f.price_scale_factor,
    }
}

pub fn adjust_size(size: f64, mode: NormalizationMode, f: &AdjustmentFactors) -> f64 {
    if mode.is_raw() {
        size
    } else {
        size / f.split_factor
    }
}

/// Normalize a point. Raw mode and non-price payloads pass through untouched;
/// otherwise the original payload is kept in `raw`.
pub fn adjust_point(mut point: DataPoint, mode: NormalizationMode, f: &AdjustmentFactors) -> DataPoint {
    if mode.is_raw() || !point.payload.is_price_data() {
        return point;
    }
    let adjusted = point
        .payload
        .map_prices(|p| adjust_price(p, mode, f), |s| adjust_size(s, mode, f));
    let raw = std::mem::replace(&mut point.payload, adjusted);
    point.value = point.payload.value();
    point.raw = Some(Box::new(raw));
    point
}

/// Factors in force on `date`, carrying the running dividend sum forward.
pub fn factors_as_of(factor_file: &FactorFile, date: NaiveDate, dividend_sum: f64) -> AdjustmentFactors {
    match factor_file.row_as_of(date) {
        Some(row) => AdjustmentFactors {
            price_scale_factor: row.price_scale_factor(),
            split_factor: row.split_factor,
            dividend_sum,
        },
        None => AdjustmentFactors { dividend_sum, ..AdjustmentFactors::default() },
    }
}

/// Book a dividend paid at the current split factor (total-return mode).
pub fn apply_dividend(f: &mut AdjustmentFactors, distribution: f64) {
    f.dividend_sum += distribution * f.split_factor;
}

/// Cash distribution implied by a drop in the price factor.
pub fn dividend_distribution(reference_price: f64, price_factor_ratio: f64) -> f64 {
    reference_price * (1.0 - price_factor_ratio)
}
