//! Built-in factories for the LEAN-style on-disk layout.
//!
//! Hour and daily data: one archive per instrument,
//! `{type}/{market}/{res}/{ticker}.zip#{ticker}.csv`, lines start with
//! `yyyyMMdd HH:mm`. Finer resolutions: one archive per day,
//! `{type}/{market}/{res}/{ticker}/{yyyyMMdd}_{tag}.zip#{yyyyMMdd}_{ticker}_{res}_{tag}.csv`,
//! lines start with milliseconds since midnight. Equity prices are stored
//! as deci-cents.

use super::factory::{DataFactory, ParseError};
use super::source::SubscriptionDataSource;
use crate::domain::{DataPoint, DataType, Ohlc, Payload, QuoteBar, SubscriptionConfig, Tick, TradeBar};
use chrono::{Duration, NaiveDate, NaiveDateTime};

fn tag(data_type: &DataType) -> &str {
    match data_type {
        DataType::Quote => "quote",
        other => other.file_tag(),
    }
}

/// Source path for `date` in the LEAN layout, using the mapped ticker.
pub fn lean_source(config: &SubscriptionConfig, date: NaiveDate) -> SubscriptionDataSource {
    let ticker = config.mapped_ticker().to_lowercase();
    let base = format!(
        "{}/{}/{}",
        config.symbol.security_type.folder(),
        config.symbol.market,
        config.resolution.folder()
    );
    let tag = tag(&config.data_type);
    if config.resolution.is_single_file() {
        let suffix = if tag == "quote" { "_quote" } else { "" };
        SubscriptionDataSource::local(format!("{base}/{ticker}{suffix}.zip#{ticker}.csv"))
    } else {
        let ymd = date.format("%Y%m%d");
        let res = config.resolution.folder();
        SubscriptionDataSource::local(format!("{base}/{ticker}/{ymd}_{tag}.zip#{ymd}_{ticker}_{res}_{tag}.csv"))
    }
}

fn columns(line: &str, expected: usize) -> Result<Vec<&str>, ParseError> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < expected {
        return Err(ParseError::ColumnCount { expected, found: cols.len() });
    }
    Ok(cols)
}

fn num(cols: &[&str], i: usize, field: &'static str) -> Result<f64, ParseError> {
    let raw = cols.get(i).copied().unwrap_or("");
    raw.parse::<f64>().map_err(|_| ParseError::bad(field, raw))
}

const MS_PER_DAY: f64 = 86_400_000.0;

/// Bar start from the first column.
fn bar_time(config: &SubscriptionConfig, first: &str, date: NaiveDate) -> Result<NaiveDateTime, ParseError> {
    if config.resolution.is_single_file() {
        NaiveDateTime::parse_from_str(first, "%Y%m%d %H:%M")
            .or_else(|_| NaiveDate::parse_from_str(first, "%Y%m%d").map(|d| d.and_time(chrono::NaiveTime::MIN)))
            .map_err(|_| ParseError::bad("time", first))
    } else {
        let ms: f64 = first.parse().map_err(|_| ParseError::bad("time", first))?;
        // offsets stay within the file's day
        if !ms.is_finite() || !(0.0..MS_PER_DAY).contains(&ms.round()) {
            return Err(ParseError::bad("time", first));
        }
        Duration::try_milliseconds(ms.round() as i64)
            .and_then(|offset| date.and_time(chrono::NaiveTime::MIN).checked_add_signed(offset))
            .ok_or_else(|| ParseError::bad("time", first))
    }
}

fn scale(config: &SubscriptionConfig) -> f64 {
    config.symbol.security_type.price_multiplier()
}

fn ohlc(cols: &[&str], at: usize, m: f64) -> Result<Option<Ohlc>, ParseError> {
    if cols[at..at + 4].iter().all(|c| c.is_empty()) {
        return Ok(None);
    }
    Ok(Some(Ohlc {
        open: num(cols, at, "open")? / m,
        high: num(cols, at + 1, "high")? / m,
        low: num(cols, at + 2, "low")? / m,
        close: num(cols, at + 3, "close")? / m,
    }))
}

fn size(cols: &[&str], i: usize, field: &'static str) -> Result<f64, ParseError> {
    match cols.get(i) {
        Some(s) if !s.is_empty() => num(cols, i, field),
        _ => Ok(0.0),
    }
}

/// `time,open,high,low,close,volume`
#[derive(Debug, Default, Clone, Copy)]
pub struct LeanTradeFactory;

impl DataFactory for LeanTradeFactory {
    fn source(&self, config: &SubscriptionConfig, date: NaiveDate, _is_live: bool) -> Option<SubscriptionDataSource> {
        Some(lean_source(config, date))
    }

    fn read(&self, config: &SubscriptionConfig, line: &str, date: NaiveDate, _is_live: bool) -> Result<Option<DataPoint>, ParseError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let cols = columns(line, 6)?;
        let time = bar_time(config, cols[0], date)?;
        let m = scale(config);
        let bar = TradeBar {
            open: num(&cols, 1, "open")? / m,
            high: num(&cols, 2, "high")? / m,
            low: num(&cols, 3, "low")? / m,
            close: num(&cols, 4, "close")? / m,
            volume: num(&cols, 5, "volume")?,
        };
        Ok(Some(DataPoint::trade_bar(config.symbol.clone(), time, config.resolution.period(), bar)))
    }
}

/// `time,bid o,h,l,c,last bid size,ask o,h,l,c,last ask size`. Either side may be empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeanQuoteFactory;

impl DataFactory for LeanQuoteFactory {
    fn source(&self, config: &SubscriptionConfig, date: NaiveDate, _is_live: bool) -> Option<SubscriptionDataSource> {
        Some(lean_source(config, date))
    }

    fn read(&self, config: &SubscriptionConfig, line: &str, date: NaiveDate, _is_live: bool) -> Result<Option<DataPoint>, ParseError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let cols = columns(line, 11)?;
        let time = bar_time(config, cols[0], date)?;
        let m = scale(config);
        let quote = QuoteBar {
            bid: ohlc(&cols, 1, m)?,
            ask: ohlc(&cols, 6, m)?,
            last_bid_size: size(&cols, 5, "bid size")?,
            last_ask_size: size(&cols, 10, "ask size")?,
        };
        if quote.bid.is_none() && quote.ask.is_none() {
            return Ok(None);
        }
        let end = time + config.resolution.period();
        Ok(Some(DataPoint::new(config.symbol.clone(), time, end, Payload::QuoteBar(quote))))
    }
}

/// `ms,price,quantity[,exchange,condition,suspicious]`. Suspicious ticks are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeanTickFactory;

impl DataFactory for LeanTickFactory {
    fn source(&self, config: &SubscriptionConfig, date: NaiveDate, _is_live: bool) -> Option<SubscriptionDataSource> {
        Some(lean_source(config, date))
    }

    fn read(&self, config: &SubscriptionConfig, line: &str, date: NaiveDate, _is_live: bool) -> Result<Option<DataPoint>, ParseError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let cols = columns(line, 3)?;
        if cols.get(5).is_some_and(|s| *s == "1") {
            return Ok(None);
        }
        let time = bar_time(config, cols[0], date)?;
        let non_empty = |i: usize| cols.get(i).filter(|s| !s.is_empty()).map(|s| s.to_string());
        let tick = Tick {
            price: num(&cols, 1, "price")? / scale(config),
            quantity: num(&cols, 2, "quantity")?,
            exchange: non_empty(3),
            condition: non_empty(4),
        };
        Ok(Some(DataPoint::new(config.symbol.clone(), time, time, Payload::Tick(tick))))
    }
}
