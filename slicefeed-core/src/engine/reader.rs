//! Single-instrument reader.
//!
//! Walks the instrument's tradeable dates, opens each date's source, parses
//! lines into points and emits them normalized, with corporate-action events
//! ahead of the first price point they affect.
//!
//! States: `AwaitingReader` (no open source) → `Reading` (lines remaining) →
//! `AdvancingDate` (source exhausted) → back to `AwaitingReader`, or `Done`
//! once the tradeable dates run out. The reader is single-pass: there is no
//! way to rewind it.
//!
//! Auxiliary events are queued in a FIFO that is always drained before the
//! next price point. On every date change the reader, in order:
//! - detects a ticker rename and updates the config's mapped ticker;
//! - recomputes the adjustment factors and publishes them to the config;
//! - emits split and dividend events for factor rows since the last date;
//! - warns of a split or delisting on the next tradeable date.
//!
//! Single-file sources (daily, hour) cover every date. A line dated ahead of
//! the current date runs the date-change logic up to its date and is held
//! until the events that produces have been emitted.

use super::adjust::{adjust_point, apply_dividend, dividend_distribution, factors_as_of, unadjust_price};
use super::synchronizer::{PointSource, Pull};
use crate::data::{
    DataEnvironment, DataError, DataFactory, FactorEventKind, FactorFile, FileFormat, MapFile, MarketHours,
    StreamReader, SubscriptionDataSource,
};
use crate::domain::{
    AdjustmentFactors, ConfigError, DataPoint, Delisting, DelistingKind, Dividend, Payload, Split, SplitKind,
    SubscriptionConfig, SymbolChanged,
};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How far ahead split warnings look for the next tradeable date.
const WARNING_HORIZON_DAYS: u64 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    AwaitingReader,
    Reading,
    AdvancingDate,
    Done,
}

enum LineRead {
    Points(Vec<DataPoint>),
    Wait,
    EndOfStream,
}

enum OpenOutcome {
    Opened,
    /// Same single-file source as the one already read.
    AlreadyRead,
    Missing,
}

pub struct SubscriptionReader {
    config: Arc<SubscriptionConfig>,
    env: DataEnvironment,
    factory: Arc<dyn DataFactory>,
    hours: Arc<dyn MarketHours>,
    factor_file: Arc<FactorFile>,
    map_file: Arc<MapFile>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    is_live: bool,
    stop: Arc<AtomicBool>,

    state: ReaderState,
    /// Next calendar date not yet considered.
    cursor: NaiveDate,
    /// Date the last date change ran for.
    date: Option<NaiveDate>,
    factors: AdjustmentFactors,
    stream: Option<Box<dyn StreamReader>>,
    source: Option<SubscriptionDataSource>,
    failed: Option<SubscriptionDataSource>,
    aux: VecDeque<DataPoint>,
    pending: VecDeque<DataPoint>,
    /// Last seen value and the factors it was adjusted with.
    previous: Option<(f64, AdjustmentFactors)>,
    empty_days: u32,
    /// Whether any source was ever opened.
    opened_any: bool,
    /// Last live attempt to open the current date's source.
    last_attempt: Option<Instant>,
    /// End time of the last emitted price point. Live re-reads skip up to it.
    last_emitted: Option<NaiveDateTime>,
}

impl SubscriptionReader {
    /// Reader over `[start, end]`. Live readers follow the wall-clock date
    /// instead and only stop when asked to.
    pub fn new(
        config: Arc<SubscriptionConfig>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        env: &DataEnvironment,
        is_live: bool,
    ) -> Result<Self, ConfigError> {
        let factory = env
            .factories
            .get(&config.data_type)
            .ok_or_else(|| ConfigError::UnregisteredDataType(config.data_type.clone()))?;
        let symbol = &config.symbol;
        let mut reader = Self {
            factor_file: env.corporate.factor_file(symbol),
            map_file: env.corporate.map_file(symbol),
            hours: env.market_hours.get(symbol),
            factory,
            env: env.clone(),
            start,
            end,
            is_live,
            stop: Arc::new(AtomicBool::new(false)),
            state: ReaderState::AwaitingReader,
            cursor: start.date(),
            date: None,
            factors: AdjustmentFactors::default(),
            stream: None,
            source: None,
            failed: None,
            aux: VecDeque::new(),
            pending: VecDeque::new(),
            previous: None,
            empty_days: 0,
            opened_any: false,
            last_attempt: None,
            last_emitted: None,
            config,
        };
        if !is_live {
            reader.check_range();
        }
        Ok(reader)
    }

    /// Share a stop flag with whoever may need to cancel this reader.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn config(&self) -> &Arc<SubscriptionConfig> {
        &self.config
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Effective start, after any numerical-precision adjustment.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// Open the first source ahead of the first pull.
    pub fn prime(&mut self) {
        if self.state == ReaderState::AwaitingReader && !self.is_live {
            self.advance_date();
        }
    }

    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.aux.clear();
        self.finish();
    }

    // ── Setup ──────────────────────────────────────────────────────────

    fn check_range(&mut self) {
        let key = self.config.key();
        if self.start > self.end {
            self.state = ReaderState::Done;
            return;
        }
        if !self.config.normalization.is_raw() && !self.factor_file.is_empty() {
            let min = self.env.settings.min_price_scale_factor;
            match self.factor_file.first_usable_date(self.start.date(), min) {
                Some(first) if first > self.start.date() => {
                    self.env.results.numerical_precision_limited(
                        &self.config.symbol,
                        &format!("{key}: price scale factor below {min} before {first}, start moved from {}", self.start.date()),
                    );
                    self.start = first.and_time(NaiveTime::MIN);
                    self.cursor = first;
                }
                Some(_) => {}
                None => {
                    self.env.results.numerical_precision_limited(
                        &self.config.symbol,
                        &format!("{key}: price scale factor never reaches {min}, nothing to read"),
                    );
                    self.state = ReaderState::Done;
                    return;
                }
            }
        }
        if !self.map_file.covers(self.start.date(), self.end.date()) {
            self.env.results.debug(&format!(
                "{key}: map file has no data between {} and {}",
                self.start.date(),
                self.end.date()
            ));
            self.state = ReaderState::Done;
        }
    }

    // ── Dates ──────────────────────────────────────────────────────────

    fn is_tradeable(&self, date: NaiveDate) -> bool {
        self.hours.date_is_open(date) && self.map_file.has_data(date)
    }

    /// First tradeable date in `[from, until]`.
    fn first_tradeable(&self, from: NaiveDate, until: NaiveDate) -> Option<NaiveDate> {
        from.iter_days().take_while(|d| *d <= until).find(|d| self.is_tradeable(*d))
    }

    fn next_tradeable(&mut self) -> Option<NaiveDate> {
        let next = self.first_tradeable(self.cursor, self.end.date())?;
        self.cursor = next.succ_opt()?;
        Some(next)
    }

    /// Run date changes for every tradeable date up to `day`. True if any ran.
    fn advance_through(&mut self, day: NaiveDate) -> bool {
        let until = day.min(self.end.date());
        let mut moved = false;
        while let Some(next) = self.first_tradeable(self.cursor, until) {
            let Some(after) = next.succ_opt() else { break };
            self.cursor = after;
            self.change_date(next);
            moved = true;
        }
        moved
    }

    fn change_date(&mut self, date: NaiveDate) {
        let previous = self.date.replace(date);
        let at = date.and_time(NaiveTime::MIN);
        let raw = self.config.normalization.is_raw();
        let raw_close = self.previous_raw_close();
        debug!(key = %self.config.key(), %date, "date change");

        match previous {
            None => {
                if let Some(ticker) = self.map_file.ticker_on(date) {
                    self.config.set_mapped_ticker(ticker);
                }
                if !raw {
                    self.factors = factors_as_of(&self.factor_file, date, 0.0);
                }
            }
            Some(prev) => {
                if let Some(rename) = self.map_file.rename_between(prev, date) {
                    debug!(key = %self.config.key(), old = %rename.old_ticker, new = %rename.new_ticker, "ticker renamed");
                    self.config.set_mapped_ticker(rename.new_ticker.as_str());
                    self.push_aux(
                        at,
                        Payload::SymbolChanged(SymbolChanged { old_ticker: rename.old_ticker, new_ticker: rename.new_ticker }),
                    );
                }
                if !raw {
                    self.factors = factors_as_of(&self.factor_file, date, self.factors.dividend_sum);
                }
                for event in self.factor_file.events_between(prev, date) {
                    let reference_price = event.reference_price.or(raw_close).unwrap_or(0.0);
                    match event.kind {
                        FactorEventKind::Split { ratio } => self.push_aux(
                            at,
                            Payload::Split(Split { kind: SplitKind::Occurred, split_factor: ratio, reference_price }),
                        ),
                        FactorEventKind::Dividend { price_factor_ratio } => {
                            let distribution = dividend_distribution(reference_price, price_factor_ratio);
                            if !raw {
                                apply_dividend(&mut self.factors, distribution);
                            }
                            self.push_aux(at, Payload::Dividend(Dividend { distribution, reference_price }));
                        }
                    }
                }
            }
        }

        if !raw {
            self.config.publish_factors(self.factors);
        }
        self.queue_warnings(date, at, raw_close);
    }

    fn queue_warnings(&mut self, date: NaiveDate, at: NaiveDateTime, raw_close: Option<f64>) {
        let Some(tomorrow) = date.succ_opt() else { return };
        let horizon = (date + Days::new(WARNING_HORIZON_DAYS)).min(self.end.date());
        if let Some(next) = self.first_tradeable(tomorrow, horizon) {
            if let Some(split) = self.factor_file.split_on(next) {
                if let FactorEventKind::Split { ratio } = split.kind {
                    let reference_price = split.reference_price.or(raw_close).unwrap_or(0.0);
                    self.push_aux(
                        at,
                        Payload::Split(Split { kind: SplitKind::Warning, split_factor: ratio, reference_price }),
                    );
                }
            }
        }
        if let Some(delisting) = self.map_file.delisting_date() {
            if date < delisting && self.first_tradeable(tomorrow, delisting).is_none() {
                self.push_aux(
                    at,
                    Payload::Delisting(Delisting { kind: DelistingKind::Warning, price: raw_close.unwrap_or(0.0) }),
                );
            }
        }
    }

    fn dates_exhausted(&mut self) {
        if !self.opened_any {
            self.env.results.debug(&format!(
                "{}: no data found between {} and {}",
                self.config.key(),
                self.start.date(),
                self.end.date()
            ));
        }
        if let Some(delisted) = self.map_file.delisting_date() {
            let not_yet = self.date.map_or(true, |d| d < delisted);
            if not_yet && delisted >= self.start.date() && delisted <= self.end.date() {
                let price = self.previous_raw_close().unwrap_or(0.0);
                debug!(key = %self.config.key(), %delisted, "delisted");
                self.push_aux(
                    delisted.and_time(NaiveTime::MIN),
                    Payload::Delisting(Delisting { kind: DelistingKind::Delisted, price }),
                );
            }
        }
        self.finish();
    }

    // ── Sources ────────────────────────────────────────────────────────

    fn advance_date(&mut self) {
        loop {
            let Some(date) = self.next_tradeable() else {
                self.dates_exhausted();
                return;
            };
            self.change_date(date);
            match self.open_for(date) {
                OpenOutcome::Opened => return,
                OpenOutcome::AlreadyRead => {}
                OpenOutcome::Missing => {
                    if self.count_empty_day(date) {
                        return;
                    }
                }
            }
        }
    }

    fn open_for(&mut self, date: NaiveDate) -> OpenOutcome {
        let Some(source) = self.factory.source(&self.config, date, self.is_live) else {
            trace!(key = %self.config.key(), %date, "no source for date");
            return OpenOutcome::Missing;
        };
        if self.source.as_ref() == Some(&source) {
            return OpenOutcome::AlreadyRead;
        }
        if self.failed.as_ref() == Some(&source) {
            return OpenOutcome::Missing;
        }
        match self.env.streams.open(&source, self.is_live) {
            Ok(stream) => {
                debug!(key = %self.config.key(), %date, %source, "source opened");
                self.stream = Some(stream);
                self.source = Some(source);
                self.state = ReaderState::Reading;
                self.empty_days = 0;
                self.opened_any = true;
                OpenOutcome::Opened
            }
            Err(e) => {
                self.report_open_failure(&source, &e);
                self.failed = Some(source);
                OpenOutcome::Missing
            }
        }
    }

    fn report_open_failure(&self, source: &SubscriptionDataSource, e: &DataError) {
        let key = self.config.key();
        match e {
            DataError::NotFound { .. } => debug!(%key, %source, "no data"),
            DataError::DownloadFailed { .. } | DataError::NetworkUnreachable(_) | DataError::CircuitBreakerTripped => {
                self.env.results.download_failed(&format!("{key}: could not fetch {source}"), &e.to_string())
            }
            _ => self.env.results.reader_error(&format!("{key}: could not open {source}"), &e.to_string()),
        }
    }

    /// Count a date without data. True when the limit was hit and the reader ended.
    fn count_empty_day(&mut self, date: NaiveDate) -> bool {
        self.empty_days += 1;
        let limit = if self.is_live {
            Some(self.env.settings.live_max_empty_days)
        } else {
            self.env.settings.max_empty_days
        };
        match limit {
            Some(limit) if self.empty_days > limit => {
                self.env.results.reader_error(
                    &format!("{}: no data for {} consecutive dates", self.config.key(), self.empty_days),
                    &format!("last date tried {date}"),
                );
                self.finish();
                true
            }
            _ => false,
        }
    }

    fn source_changed(&self) -> bool {
        let Some(date) = self.date else { return false };
        self.factory.source(&self.config, date, self.is_live).as_ref() != self.source.as_ref()
    }

    /// The current date now reads from a different source (rename): drop
    /// what was read ahead and open the new one.
    fn reopen(&mut self) {
        self.close_stream();
        self.pending.clear();
        let opened = match self.date {
            Some(date) => matches!(self.open_for(date), OpenOutcome::Opened),
            None => false,
        };
        if !opened {
            self.state = ReaderState::AwaitingReader;
        }
    }

    fn await_live(&mut self) -> bool {
        let today = Utc::now().date_naive();
        if self.date == Some(today) {
            return self.retry_live(today);
        }
        self.last_attempt = Some(Instant::now());
        self.change_date(today);
        match self.open_for(today) {
            OpenOutcome::Opened => true,
            OpenOutcome::AlreadyRead => false,
            OpenOutcome::Missing => {
                self.count_empty_day(today);
                false
            }
        }
    }

    /// Reopen today's source once per poll interval: a missing one may have
    /// appeared, one read to its end may have grown.
    fn retry_live(&mut self, today: NaiveDate) -> bool {
        let interval = Duration::from_millis(self.env.settings.poll_interval_ms);
        if self.last_attempt.is_some_and(|t| t.elapsed() < interval) {
            return false;
        }
        self.last_attempt = Some(Instant::now());
        self.failed = None;
        self.source = None;
        trace!(key = %self.config.key(), %today, "reopening live source");
        matches!(self.open_for(today), OpenOutcome::Opened)
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    fn finish(&mut self) {
        self.close_stream();
        self.pending.clear();
        self.state = ReaderState::Done;
    }

    // ── Points ─────────────────────────────────────────────────────────

    fn push_aux(&mut self, at: NaiveDateTime, payload: Payload) {
        self.aux.push_back(DataPoint::auxiliary(self.config.symbol.clone(), at, payload));
    }

    fn previous_raw_close(&self) -> Option<f64> {
        self.previous
            .map(|(value, factors)| unadjust_price(value, self.config.normalization, &factors))
    }

    fn remember(&mut self, point: &DataPoint) {
        if !point.is_auxiliary() {
            self.previous = Some((point.value, self.factors));
        }
    }

    fn read_next(&mut self) -> LineRead {
        let Some(stream) = self.stream.as_mut() else {
            return LineRead::EndOfStream;
        };
        let Some(line) = stream.read_line() else {
            return if stream.end_of_stream() { LineRead::EndOfStream } else { LineRead::Wait };
        };
        let date = self.date.unwrap_or(self.cursor);
        let collection = self.source.as_ref().is_some_and(|s| s.format == FileFormat::Collection);
        let parsed = if collection {
            self.factory.read_collection(&self.config, &line, date, self.is_live)
        } else {
            self.factory
                .read(&self.config, &line, date, self.is_live)
                .map(|p| p.into_iter().collect())
        };
        match parsed {
            Ok(points) => LineRead::Points(points),
            Err(e) => {
                self.env
                    .results
                    .reader_error(&format!("{}: could not parse line", self.config.key()), &format!("{e}: {line}"));
                LineRead::Points(Vec::new())
            }
        }
    }

    /// Bounds, filters, normalization. `None` when the point is not emitted.
    fn admit(&mut self, point: DataPoint) -> Option<DataPoint> {
        let mode = self.config.normalization;
        if !self.is_live && point.time > self.end {
            debug!(key = %self.config.key(), "past end of range");
            self.finish();
            return None;
        }
        if let Some(current) = self.date {
            let day = point.time.date();
            if day < current && !self.is_live {
                let seen = adjust_point(point, mode, &self.factors);
                self.remember(&seen);
                return None;
            }
            if day > current {
                let moved = if self.is_live {
                    self.change_date(day);
                    true
                } else {
                    self.advance_through(day)
                };
                if moved {
                    if !self.is_live && self.source_changed() {
                        self.reopen();
                    } else {
                        self.pending.push_front(point);
                    }
                    return None;
                }
            }
        }

        if self.is_live && self.last_emitted.is_some_and(|t| point.end_time <= t) {
            return None;
        }
        let point = adjust_point(point, mode, &self.factors);
        if point.end_time < self.start {
            self.remember(&point);
            return None;
        }
        match self.env.filter.filter(&self.config.symbol, &point) {
            Ok(true) => {}
            Ok(false) => {
                trace!(key = %self.config.key(), time = %point.time, "filtered out");
                return None;
            }
            Err(e) => self
                .env
                .results
                .reader_error(&format!("{}: content filter failed, point kept", self.config.key()), &e.to_string()),
        }
        self.remember(&point);
        if !self.hours.is_open_during_bar(point.time, point.end_time, self.config.extended_hours) {
            return None;
        }
        self.last_emitted = Some(point.end_time);
        Some(point)
    }

    fn step(&mut self) -> Pull {
        // live sources are polled at most once per pull
        let mut polled = false;
        loop {
            if self.state != ReaderState::Done && self.stop.load(Ordering::Acquire) {
                debug!(key = %self.config.key(), "reader stopped");
                self.aux.clear();
                self.finish();
            }
            if let Some(point) = self.aux.pop_front() {
                return Pull::Ready(point);
            }
            match self.state {
                ReaderState::Done => return Pull::Exhausted,
                ReaderState::AwaitingReader => {
                    if self.is_live {
                        if polled {
                            return Pull::Pending;
                        }
                        polled = true;
                        if !self.await_live() && self.aux.is_empty() {
                            return Pull::Pending;
                        }
                    } else {
                        self.advance_date();
                    }
                }
                ReaderState::Reading => {
                    if let Some(point) = self.pending.pop_front() {
                        if let Some(point) = self.admit(point) {
                            return Pull::Ready(point);
                        }
                        continue;
                    }
                    match self.read_next() {
                        LineRead::Points(points) => self.pending.extend(points),
                        LineRead::Wait => return Pull::Pending,
                        LineRead::EndOfStream => self.state = ReaderState::AdvancingDate,
                    }
                }
                ReaderState::AdvancingDate => {
                    self.close_stream();
                    self.state = ReaderState::AwaitingReader;
                }
            }
        }
    }
}

impl PointSource for SubscriptionReader {
    fn pull(&mut self) -> Pull {
        self.step()
    }

    fn close(&mut self) {
        SubscriptionReader::close(self);
    }
}

impl Iterator for SubscriptionReader {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        let idle = Duration::from_millis(self.env.settings.poll_interval_ms);
        loop {
            match self.step() {
                Pull::Ready(point) => return Some(point),
                Pull::Exhausted => return None,
                Pull::Pending => std::thread::sleep(idle),
            }
        }
    }
}
