//! Data factories: per data type, where a date's data lives and how a line
//! becomes a point.
//!
//! Factories are registered explicitly in a `DataFactoryRegistry` keyed by
//! `DataType` at bootstrap; readers look theirs up once at construction.

use super::lean::{LeanQuoteFactory, LeanTickFactory, LeanTradeFactory};
use super::source::SubscriptionDataSource;
use crate::domain::{DataPoint, DataType, SubscriptionConfig};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Line-level parse failure. Reported, then the line is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected at least {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },

    #[error("bad {field}: '{value}'")]
    BadField { field: &'static str, value: String },

    #[error("{0}")]
    Other(String),
}

impl ParseError {
    pub fn bad(field: &'static str, value: &str) -> Self {
        ParseError::BadField { field, value: value.to_string() }
    }
}

pub trait DataFactory: Send + Sync {
    /// Source for `date`, or `None` when there is nothing to read that day.
    fn source(&self, config: &SubscriptionConfig, date: NaiveDate, is_live: bool) -> Option<SubscriptionDataSource>;

    /// Parse one line. `Ok(None)` skips the line without complaint.
    fn read(&self, config: &SubscriptionConfig, line: &str, date: NaiveDate, is_live: bool) -> Result<Option<DataPoint>, ParseError>;

    /// Parse one line of a collection source into any number of points.
    fn read_collection(
        &self,
        config: &SubscriptionConfig,
        line: &str,
        date: NaiveDate,
        is_live: bool,
    ) -> Result<Vec<DataPoint>, ParseError> {
        Ok(self.read(config, line, date, is_live)?.into_iter().collect())
    }
}

#[derive(Clone, Default)]
pub struct DataFactoryRegistry {
    factories: HashMap<DataType, Arc<dyn DataFactory>>,
}

impl DataFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in trade, quote and tick factories.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DataType::Trade, Arc::new(LeanTradeFactory));
        registry.register(DataType::Quote, Arc::new(LeanQuoteFactory));
        registry.register(DataType::Tick, Arc::new(LeanTickFactory));
        registry
    }

    /// Register (or replace) the factory for `data_type`.
    pub fn register(&mut self, data_type: DataType, factory: Arc<dyn DataFactory>) {
        self.factories.insert(data_type, factory);
    }

    pub fn get(&self, data_type: &DataType) -> Option<Arc<dyn DataFactory>> {
        self.factories.get(data_type).cloned()
    }

    pub fn contains(&self, data_type: &DataType) -> bool {
        self.factories.contains_key(data_type)
    }

    pub fn data_types(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
