//! Factor files: cumulative split and dividend factors per instrument.
//!
//! Line format: `yyyyMMdd,price_factor,split_factor[,reference_price]`.
//! A row is effective from its date: the factors as of date X come from the
//! row with the greatest date <= X. Before the first row every factor is 1.0,
//! and a missing file is an empty table with the same neutral answers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FactorFileError {
    #[error("I/O error reading factor file: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    BadRow { line: usize, reason: String },
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorRow {
    pub date: NaiveDate,
    pub price_factor: f64,
    pub split_factor: f64,
    /// Raw close the factors were derived from, 0 when unknown.
    pub reference_price: f64,
}

impl FactorRow {
    pub fn price_scale_factor(&self) -> f64 {
        self.price_factor * self.split_factor
    }

    fn parse(line_no: usize, line: &str) -> Result<Self, FactorFileError> {
        let bad = |reason: &str| FactorFileError::BadRow { line: line_no, reason: reason.to_string() };
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.len() < 3 {
            return Err(bad("expected at least 3 columns"));
        }
        let date = parse_date(cols[0]).ok_or_else(|| bad("bad date"))?;
        let price_factor: f64 = cols[1].parse().map_err(|_| bad("bad price factor"))?;
        let split_factor: f64 = cols[2].parse().map_err(|_| bad("bad split factor"))?;
        if !(price_factor > 0.0 && split_factor > 0.0) {
            return Err(bad("factors must be positive"));
        }
        let reference_price = match cols.get(3) {
            Some(s) if !s.is_empty() => s.parse().map_err(|_| bad("bad reference price"))?,
            _ => 0.0,
        };
        Ok(Self { date, price_factor, split_factor, reference_price })
    }
}

/// A change between two consecutive rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FactorEventKind {
    /// `ratio` multiplies prices from the event date on (0.5 for 2-for-1).
    Split { ratio: f64 },
    /// `price_factor_ratio` < 1 is the fraction of the reference price kept
    /// after the distribution.
    Dividend { price_factor_ratio: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorEvent {
    pub date: NaiveDate,
    pub kind: FactorEventKind,
    /// From the row, when it carries one.
    pub reference_price: Option<f64>,
}

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorFile {
    rows: Vec<FactorRow>,
}

impl FactorFile {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(mut rows: Vec<FactorRow>) -> Self {
        rows.sort_by_key(|r| r.date);
        rows.dedup_by_key(|r| r.date);
        Self { rows }
    }

    /// Parse a factor file. Malformed rows are skipped with a warning.
    pub fn parse(reader: impl Read) -> Result<Self, FactorFileError> {
        let mut rows = Vec::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match FactorRow::parse(idx + 1, trimmed) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(error = %e, "skipping factor file row"),
            }
        }
        Ok(Self::from_rows(rows))
    }

    pub fn rows(&self) -> &[FactorRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row in force on `date`.
    pub fn row_as_of(&self, date: NaiveDate) -> Option<&FactorRow> {
        let idx = self.rows.partition_point(|r| r.date <= date);
        idx.checked_sub(1).map(|i| &self.rows[i])
    }

    pub fn price_factor(&self, date: NaiveDate) -> f64 {
        self.row_as_of(date).map_or(1.0, |r| r.price_factor)
    }

    pub fn split_factor(&self, date: NaiveDate) -> f64 {
        self.row_as_of(date).map_or(1.0, |r| r.split_factor)
    }

    pub fn price_scale_factor(&self, date: NaiveDate) -> f64 {
        self.row_as_of(date).map_or(1.0, FactorRow::price_scale_factor)
    }

    /// Split and dividend events with `after < date <= through`, in date order.
    /// A split is emitted before a dividend on the same date.
    pub fn events_between(&self, after: NaiveDate, through: NaiveDate) -> Vec<FactorEvent> {
        let mut events = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            if row.date <= after || row.date > through {
                continue;
            }
            let (prev_pf, prev_sf) = match i.checked_sub(1) {
                Some(p) => (self.rows[p].price_factor, self.rows[p].split_factor),
                None => (1.0, 1.0),
            };
            let reference_price = (row.reference_price > 0.0).then_some(row.reference_price);
            if (row.split_factor - prev_sf).abs() > EPS {
                events.push(FactorEvent {
                    date: row.date,
                    kind: FactorEventKind::Split { ratio: row.split_factor / prev_sf },
                    reference_price,
                });
            }
            if (row.price_factor - prev_pf).abs() > EPS {
                events.push(FactorEvent {
                    date: row.date,
                    kind: FactorEventKind::Dividend { price_factor_ratio: row.price_factor / prev_pf },
                    reference_price,
                });
            }
        }
        events
    }

    /// Split taking effect exactly on `date`, if any.
    pub fn split_on(&self, date: NaiveDate) -> Option<FactorEvent> {
        self.events_between(date.pred_opt()?, date)
            .into_iter()
            .find(|e| matches!(e.kind, FactorEventKind::Split { .. }))
    }

    /// First date at or after `start` whose price scale factor is at least
    /// `min_price_scale_factor`. `None` when no such date exists.
    pub fn first_usable_date(&self, start: NaiveDate, min_price_scale_factor: f64) -> Option<NaiveDate> {
        if self.price_scale_factor(start) >= min_price_scale_factor {
            return Some(start);
        }
        self.rows
            .iter()
            .find(|r| r.date > start && r.price_scale_factor() >= min_price_scale_factor)
            .map(|r| r.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn split_file() -> FactorFile {
        FactorFile::parse("20200101,1.0,1.0,0\n20200615,1.0,0.5,200\n".as_bytes()).unwrap()
    }

    #[test]
    fn factors_are_effective_from_row_date() {
        let ff = split_file();
        assert_eq!(ff.price_scale_factor(d(2019, 12, 31)), 1.0);
        assert_eq!(ff.price_scale_factor(d(2020, 6, 14)), 1.0);
        assert_eq!(ff.price_scale_factor(d(2020, 6, 15)), 0.5);
        assert_eq!(ff.price_scale_factor(d(2020, 6, 20)), 0.5);
    }

    #[test]
    fn empty_table_is_neutral() {
        let ff = FactorFile::empty();
        assert_eq!(ff.price_scale_factor(d(2020, 1, 1)), 1.0);
        assert_eq!(ff.split_factor(d(2020, 1, 1)), 1.0);
        assert!(ff.events_between(d(2000, 1, 1), d(2030, 1, 1)).is_empty());
    }

    #[test]
    fn events_between_is_half_open() {
        let ff = split_file();
        assert!(ff.events_between(d(2020, 6, 15), d(2020, 6, 20)).is_empty());
        let events = ff.events_between(d(2020, 6, 12), d(2020, 6, 15));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FactorEventKind::Split { ratio: 0.5 });
        assert_eq!(events[0].reference_price, Some(200.0));
        assert!(ff.split_on(d(2020, 6, 15)).is_some());
        assert!(ff.split_on(d(2020, 6, 16)).is_none());
    }

    #[test]
    fn dividend_and_split_on_same_row() {
        let ff = FactorFile::parse("20200101,1,1\n20200301,0.98,0.25,50\n".as_bytes()).unwrap();
        let events = ff.events_between(d(2020, 1, 1), d(2020, 12, 31));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, FactorEventKind::Split { .. }));
        match events[1].kind {
            FactorEventKind::Dividend { price_factor_ratio } => assert!((price_factor_ratio - 0.98).abs() < 1e-12),
            other => panic!("expected dividend, got {other:?}"),
        }
    }

    #[test]
    fn bad_rows_are_skipped() {
        let ff = FactorFile::parse("garbage\n20200101,1,1\n20200102,x,1\n20200103,0,1\n# comment\n\n".as_bytes()).unwrap();
        assert_eq!(ff.rows().len(), 1);
    }

    #[test]
    fn unsorted_rows_are_sorted() {
        let ff = FactorFile::parse("20200615,1,0.5\n20200101,1,1\n".as_bytes()).unwrap();
        assert_eq!(ff.rows()[0].date, d(2020, 1, 1));
    }

    #[test]
    fn first_usable_date_moves_start_forward() {
        let ff = FactorFile::parse("19900101,1,0.000001\n20000101,1,0.01\n".as_bytes()).unwrap();
        assert_eq!(ff.first_usable_date(d(1995, 1, 1), 1e-5), Some(d(2000, 1, 1)));
        assert_eq!(ff.first_usable_date(d(2001, 1, 1), 1e-5), Some(d(2001, 1, 1)));
        assert_eq!(ff.first_usable_date(d(1995, 1, 1), 0.5), None);
    }
}
