//! Exchange calendar: which dates trade and which bars fall inside a session.

use crate::domain::{SecurityType, Symbol};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub trait MarketHours: Send + Sync {
    /// Whether a bar spanning `[start, end)` overlaps a session. Zero-length
    /// bars (ticks) must start inside one.
    fn is_open_during_bar(&self, start: NaiveDateTime, end: NaiveDateTime, extended_hours: bool) -> bool;

    fn date_is_open(&self, date: NaiveDate) -> bool;
}

/// Session as seconds from midnight, `[start, end)`. `end` may be 86400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub start: u32,
    pub end: u32,
}

impl Session {
    pub const fn hm(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> Self {
        Self { start: start_h * 3600 + start_m * 60, end: end_h * 3600 + end_m * 60 }
    }

    pub const fn all_day() -> Self {
        Self { start: 0, end: 86_400 }
    }

    fn overlaps(&self, bar_start: u32, bar_end: u32) -> bool {
        if bar_start == bar_end {
            bar_start >= self.start && bar_start < self.end
        } else {
            bar_start < self.end && self.start < bar_end
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeHours {
    regular: Vec<Session>,
    extended: Vec<Session>,
    open_weekends: bool,
    holidays: BTreeSet<NaiveDate>,
}

impl ExchangeHours {
    pub fn new(regular: Vec<Session>, extended: Vec<Session>, open_weekends: bool) -> Self {
        Self { regular, extended, open_weekends, holidays: BTreeSet::new() }
    }

    /// 09:30-16:00 regular, 04:00-09:30 and 16:00-20:00 extended, weekdays.
    pub fn us_equity() -> Self {
        Self::new(vec![Session::hm(9, 30, 16, 0)], vec![Session::hm(4, 0, 9, 30), Session::hm(16, 0, 20, 0)], false)
    }

    /// Around the clock, every day.
    pub fn always_open() -> Self {
        Self::new(vec![Session::all_day()], Vec::new(), true)
    }

    /// Around the clock on weekdays.
    pub fn weekdays() -> Self {
        Self::new(vec![Session::all_day()], Vec::new(), false)
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    fn seconds(t: NaiveDateTime) -> u32 {
        t.time().num_seconds_from_midnight()
    }
}

impl MarketHours for ExchangeHours {
    fn is_open_during_bar(&self, start: NaiveDateTime, end: NaiveDateTime, extended_hours: bool) -> bool {
        // Daily (and longer) bars are judged by their dates alone.
        if end - start >= Duration::days(1) {
            let mut date = start.date();
            while date < end.date() {
                if self.date_is_open(date) {
                    return true;
                }
                match date.succ_opt() {
                    Some(next) => date = next,
                    None => break,
                }
            }
            return false;
        }
        if !self.date_is_open(start.date()) {
            return false;
        }
        let bar_start = Self::seconds(start);
        let bar_end = if end.date() > start.date() { 86_400 } else { Self::seconds(end) };
        let mut sessions = self.regular.iter().chain(self.extended.iter().filter(|_| extended_hours));
        sessions.any(|s| s.overlaps(bar_start, bar_end))
    }

    fn date_is_open(&self, date: NaiveDate) -> bool {
        if !self.open_weekends && matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self.holidays.contains(&date)
    }
}

/// Exchange hours per (market, security type), constructed at bootstrap and
/// injected into readers.
pub struct MarketHoursDatabase {
    entries: HashMap<(String, SecurityType), Arc<dyn MarketHours>>,
    holidays: Vec<NaiveDate>,
}

impl MarketHoursDatabase {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self { entries: HashMap::new(), holidays: holidays.into_iter().collect() }
    }

    pub fn insert(&mut self, market: impl Into<String>, security_type: SecurityType, hours: Arc<dyn MarketHours>) {
        self.entries.insert((market.into().to_lowercase(), security_type), hours);
    }

    /// Explicit entry, else the default hours for the security type.
    pub fn get(&self, symbol: &Symbol) -> Arc<dyn MarketHours> {
        if let Some(hours) = self.entries.get(&(symbol.market.clone(), symbol.security_type)) {
            return Arc::clone(hours);
        }
        let hours = match symbol.security_type {
            SecurityType::Equity => ExchangeHours::us_equity().with_holidays(self.holidays.iter().copied()),
            SecurityType::Crypto | SecurityType::Custom => ExchangeHours::always_open(),
            SecurityType::Forex | SecurityType::Future | SecurityType::Index => ExchangeHours::weekdays(),
        };
        Arc::new(hours)
    }
}

impl Default for MarketHoursDatabase {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn us_equity_sessions() {
        let hours = ExchangeHours::us_equity();
        // Thursday 2020-01-02
        assert!(hours.is_open_during_bar(at(2020, 1, 2, 9, 30), at(2020, 1, 2, 9, 31), false));
        assert!(!hours.is_open_during_bar(at(2020, 1, 2, 9, 29), at(2020, 1, 2, 9, 30), false));
        assert!(hours.is_open_during_bar(at(2020, 1, 2, 9, 29), at(2020, 1, 2, 9, 30), true));
        assert!(!hours.is_open_during_bar(at(2020, 1, 2, 20, 0), at(2020, 1, 2, 20, 1), true));
    }

    #[test]
    fn ticks_must_start_inside_session() {
        let hours = ExchangeHours::us_equity();
        let t = at(2020, 1, 2, 16, 0);
        assert!(!hours.is_open_during_bar(t, t, false));
        assert!(hours.is_open_during_bar(t, t, true));
    }

    #[test]
    fn weekends_and_holidays_are_closed() {
        let hours = ExchangeHours::us_equity().with_holidays([NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()]);
        assert!(!hours.date_is_open(NaiveDate::from_ymd_opt(2020, 1, 4).unwrap()));
        assert!(!hours.date_is_open(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
        assert!(hours.date_is_open(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()));
    }

    #[test]
    fn daily_bars_judged_by_date() {
        let hours = ExchangeHours::us_equity();
        assert!(hours.is_open_during_bar(at(2020, 1, 2, 0, 0), at(2020, 1, 3, 0, 0), false));
        assert!(!hours.is_open_during_bar(at(2020, 1, 4, 0, 0), at(2020, 1, 5, 0, 0), false));
    }

    #[test]
    fn database_defaults_by_security_type() {
        let db = MarketHoursDatabase::default();
        let sat = NaiveDate::from_ymd_opt(2020, 1, 4).unwrap();
        assert!(!db.get(&Symbol::equity("SPY")).date_is_open(sat));
        assert!(db.get(&Symbol::new("BTCUSD", SecurityType::Crypto, "coinbase")).date_is_open(sat));
    }

    #[test]
    fn explicit_entry_wins() {
        let mut db = MarketHoursDatabase::default();
        db.insert("usa", SecurityType::Equity, Arc::new(ExchangeHours::always_open()));
        let sat = NaiveDate::from_ymd_opt(2020, 1, 4).unwrap();
        assert!(db.get(&Symbol::equity("SPY")).date_is_open(sat));
    }
}
