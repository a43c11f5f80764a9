//! Map files: which ticker an instrument traded under on each date.
//!
//! Line format: `yyyyMMdd,ticker`. Rows are effective from their date. A row
//! with an empty ticker means there is no data from that date on; when it is
//! the last row, its date is the delisting date.

use super::factor_file::parse_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MapFileError {
    #[error("I/O error reading map file: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    BadRow { line: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRow {
    pub date: NaiveDate,
    /// Empty when the instrument has no data from `date` on.
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub date: NaiveDate,
    pub old_ticker: String,
    pub new_ticker: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFile {
    rows: Vec<MapRow>,
}

impl MapFile {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(mut rows: Vec<MapRow>) -> Self {
        for r in &mut rows {
            r.ticker = r.ticker.trim().to_uppercase();
        }
        rows.sort_by_key(|r| r.date);
        rows.dedup_by_key(|r| r.date);
        Self { rows }
    }

    /// Parse a map file. Malformed rows are skipped with a warning.
    pub fn parse(reader: impl Read) -> Result<Self, MapFileError> {
        let mut rows = Vec::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut cols = trimmed.splitn(3, ',');
            let date = cols.next().and_then(parse_date);
            let ticker = cols.next().unwrap_or("");
            match date {
                Some(date) => rows.push(MapRow { date, ticker: ticker.to_string() }),
                None => {
                    let e = MapFileError::BadRow { line: idx + 1, reason: "bad date".into() };
                    warn!(error = %e, "skipping map file row");
                }
            }
        }
        Ok(Self::from_rows(rows))
    }

    pub fn rows(&self) -> &[MapRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row_as_of(&self, date: NaiveDate) -> Option<&MapRow> {
        let idx = self.rows.partition_point(|r| r.date <= date);
        match idx.checked_sub(1) {
            Some(i) => Some(&self.rows[i]),
            None => self.rows.first(),
        }
    }

    /// Ticker in force on `date`; `None` when the instrument has no data then.
    /// Before the first row the first row's ticker applies.
    pub fn ticker_on(&self, date: NaiveDate) -> Option<&str> {
        self.row_as_of(date).map(|r| r.ticker.as_str()).filter(|t| !t.is_empty())
    }

    /// An empty table says nothing, so every date has data.
    pub fn has_data(&self, date: NaiveDate) -> bool {
        self.is_empty() || self.ticker_on(date).is_some()
    }

    pub fn delisting_date(&self) -> Option<NaiveDate> {
        self.rows.last().filter(|r| r.ticker.is_empty()).map(|r| r.date)
    }

    /// Whether any date in `[start, end]` has data.
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        if self.has_data(start) {
            return true;
        }
        self.rows
            .iter()
            .any(|r| r.date > start && r.date <= end && !r.ticker.is_empty())
    }

    /// Rename taking effect in `(after, through]`, compared end to end.
    pub fn rename_between(&self, after: NaiveDate, through: NaiveDate) -> Option<Rename> {
        let old = self.ticker_on(after)?;
        let new = self.ticker_on(through)?;
        if old == new {
            return None;
        }
        let date = self
            .rows
            .iter()
            .rev()
            .find(|r| r.date > after && r.date <= through && r.ticker == new)
            .map_or(through, |r| r.date);
        Some(Rename { date, old_ticker: old.to_string(), new_ticker: new.to_string() })
    }
}
