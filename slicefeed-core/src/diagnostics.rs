//! Result channel: where readers report problems they recovered from.
//!
//! Nothing reported here stops a run. Configuration errors disable one
//! subscription; everything else is informational.

use crate::domain::Symbol;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    InvalidConfiguration { message: String },
    DownloadFailed { message: String, detail: String },
    ReaderError { message: String, detail: String },
    Debug { message: String },
    NumericalPrecisionLimited { symbol: Symbol, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    InvalidConfiguration,
    DownloadFailed,
    ReaderError,
    Debug,
    NumericalPrecisionLimited,
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::InvalidConfiguration { .. } => DiagnosticKind::InvalidConfiguration,
            Diagnostic::DownloadFailed { .. } => DiagnosticKind::DownloadFailed,
            Diagnostic::ReaderError { .. } => DiagnosticKind::ReaderError,
            Diagnostic::Debug { .. } => DiagnosticKind::Debug,
            Diagnostic::NumericalPrecisionLimited { .. } => DiagnosticKind::NumericalPrecisionLimited,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Diagnostic::InvalidConfiguration { message }
            | Diagnostic::DownloadFailed { message, .. }
            | Diagnostic::ReaderError { message, .. }
            | Diagnostic::Debug { message }
            | Diagnostic::NumericalPrecisionLimited { message, .. } => message,
        }
    }
}

pub trait ResultChannel: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn invalid_configuration(&self, message: &str) {
        self.report(Diagnostic::InvalidConfiguration { message: message.to_string() });
    }

    fn download_failed(&self, message: &str, detail: &str) {
        self.report(Diagnostic::DownloadFailed { message: message.to_string(), detail: detail.to_string() });
    }

    fn reader_error(&self, message: &str, detail: &str) {
        self.report(Diagnostic::ReaderError { message: message.to_string(), detail: detail.to_string() });
    }

    fn debug(&self, message: &str) {
        self.report(Diagnostic::Debug { message: message.to_string() });
    }

    fn numerical_precision_limited(&self, symbol: &Symbol, message: &str) {
        self.report(Diagnostic::NumericalPrecisionLimited { symbol: symbol.clone(), message: message.to_string() });
    }
}

/// Writes every diagnostic to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResultChannel;

impl ResultChannel for LogResultChannel {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::InvalidConfiguration { message } => error!(%message, "invalid subscription configuration"),
            Diagnostic::DownloadFailed { message, detail } => warn!(%message, %detail, "download failed"),
            Diagnostic::ReaderError { message, detail } => error!(%message, %detail, "reader error"),
            Diagnostic::Debug { message } => debug!(%message, "diagnostic"),
            Diagnostic::NumericalPrecisionLimited { symbol, message } => {
                info!(symbol = %symbol.ticker, %message, "numerical precision limited")
            }
        }
    }
}

/// Keeps every diagnostic for later inspection, and logs it.
#[derive(Debug, Default)]
pub struct RecordingResultChannel {
    recorded: Mutex<Vec<Diagnostic>>,
}

impl RecordingResultChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.recorded.lock().clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.recorded.lock().iter().filter(|d| d.kind() == kind).count()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.recorded.lock())
    }
}

impl ResultChannel for RecordingResultChannel {
    fn report(&self, diagnostic: Diagnostic) {
        LogResultChannel.report(diagnostic.clone());
        self.recorded.lock().push(diagnostic);
    }
}
