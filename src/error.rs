//! Error taxonomy for report extraction.
//!
//! Field-level failures (`NotFound`) blank a single statistic. Report-level
//! failures (`TableNotFound`, `MalformedTemplate`, `Pdf`) skip the report.
//! Nothing here is fatal to a batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// An anchor, keyword or value was absent.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// No table could be detected on the expected page (1-based).
    #[error("no table found on page {page}")]
    TableNotFound { page: usize },

    /// The document does not follow the expected template layout.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// True when the whole report has to be skipped rather than one field.
    pub fn skips_report(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
