//! Custom data described in configuration instead of code.
//!
//! A `[[custom_data]]` table names the type, a source template and the
//! columns. CSV sources hold one point per line: the time column first, then
//! the named numeric columns. Collection sources hold a JSON array of
//! objects per line, each object one point. Lines that do not parse (headers,
//! blanks, junk) produce no point.

use super::factory::{DataFactory, ParseError};
use super::source::{FileFormat, SubscriptionDataSource, Transport};
use crate::domain::{DataPoint, Payload, SubscriptionConfig};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_time_field() -> String {
    "time".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDataSpec {
    /// Becomes `DataType::Custom(name)`.
    pub name: String,
    /// Path or URL with `{ticker}`, `{TICKER}` and `{date}` (yyyyMMdd) placeholders.
    pub source: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub format: FileFormat,
    /// chrono format of the time column; a date-only format means midnight.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Key holding the time in collection objects.
    #[serde(default = "default_time_field")]
    pub time_field: String,
    /// CSV: names of the columns after the time column. Collection: numeric
    /// keys to keep (empty keeps every numeric key).
    #[serde(default)]
    pub columns: Vec<String>,
    /// Field reported as the point's value; falls back to the first column.
    #[serde(default = "default_value_field")]
    pub value_field: String,
}

/// Factory for one `CustomDataSpec`.
#[derive(Debug, Clone)]
pub struct CsvCustomFactory {
    spec: CustomDataSpec,
}

impl CsvCustomFactory {
    pub fn new(spec: CustomDataSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CustomDataSpec {
        &self.spec
    }

    fn parse_time(&self, raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, &self.spec.date_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, &self.spec.date_format)
                    .ok()
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            })
    }

    fn point(&self, config: &SubscriptionConfig, time: NaiveDateTime, fields: BTreeMap<String, f64>) -> DataPoint {
        let value = fields
            .get(&self.spec.value_field)
            .copied()
            .or_else(|| self.spec.columns.first().and_then(|c| fields.get(c)).copied())
            .or_else(|| fields.values().next().copied())
            .unwrap_or(0.0);
        let end = time + config.resolution.period();
        let mut point = DataPoint::new(config.symbol.clone(), time, end, Payload::Custom(fields));
        point.value = value;
        point
    }

    fn read_csv(&self, config: &SubscriptionConfig, line: &str) -> Option<DataPoint> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes());
        let record = rdr.records().next()?.ok()?;
        let time = self.parse_time(record.get(0)?)?;
        let mut fields = BTreeMap::new();
        for (name, raw) in self.spec.columns.iter().zip(record.iter().skip(1)) {
            if raw.is_empty() {
                continue;
            }
            fields.insert(name.clone(), raw.parse::<f64>().ok()?);
        }
        Some(self.point(config, time, fields))
    }

    fn read_json(&self, config: &SubscriptionConfig, line: &str) -> Vec<DataPoint> {
        let Ok(objects) = serde_json::from_str::<Vec<serde_json::Map<String, serde_json::Value>>>(line) else {
            return Vec::new();
        };
        objects
            .into_iter()
            .filter_map(|obj| {
                let time = obj.get(&self.spec.time_field)?.as_str().and_then(|s| self.parse_time(s))?;
                let fields: BTreeMap<String, f64> = obj
                    .iter()
                    .filter(|(k, _)| **k != self.spec.time_field)
                    .filter(|(k, _)| self.spec.columns.is_empty() || self.spec.columns.contains(k))
                    .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                    .collect();
                Some(self.point(config, time, fields))
            })
            .collect()
    }
}

impl DataFactory for CsvCustomFactory {
    fn source(&self, config: &SubscriptionConfig, date: NaiveDate, _is_live: bool) -> Option<SubscriptionDataSource> {
        let ticker = config.mapped_ticker();
        let path = self
            .spec
            .source
            .replace("{ticker}", &ticker.to_lowercase())
            .replace("{TICKER}", &ticker.to_uppercase())
            .replace("{date}", &date.format("%Y%m%d").to_string());
        Some(SubscriptionDataSource { path, transport: self.spec.transport, format: self.spec.format })
    }

    fn read(&self, config: &SubscriptionConfig, line: &str, _date: NaiveDate, _is_live: bool) -> Result<Option<DataPoint>, ParseError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let point = match self.spec.format {
            FileFormat::Csv => self.read_csv(config, line),
            FileFormat::Collection => self.read_json(config, line).into_iter().next(),
        };
        if point.is_none() {
            debug!(name = %self.spec.name, line, "custom line produced no point");
        }
        Ok(point)
    }

    fn read_collection(
        &self,
        config: &SubscriptionConfig,
        line: &str,
        date: NaiveDate,
        is_live: bool,
    ) -> Result<Vec<DataPoint>, ParseError> {
        match self.spec.format {
            FileFormat::Collection => Ok(self.read_json(config, line)),
            FileFormat::Csv => Ok(self.read(config, line, date, is_live)?.into_iter().collect()),
        }
    }
}
