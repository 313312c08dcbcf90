//! Pluggable page-text providers.
//!
//! Defines the [`TextProvider`] trait and the [`ReportDocument`] it produces so
//! the extraction core never depends on a particular PDF backend.

pub mod lopdf_text;
pub mod plain_text;

use crate::error::ExtractResult;

/// Per-page text of one report, in page order.
#[derive(Debug, Clone, Default)]
pub struct ReportDocument {
    pub pages: Vec<String>,
}

impl ReportDocument {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages: pages.into_iter().map(|p| clean_page(&p)).collect(),
        }
    }

    /// Text of a 1-based page.
    pub fn page(&self, page_num: usize) -> Option<&str> {
        page_num
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
            .map(String::as_str)
    }

    /// All page text as one flat line sequence.
    pub fn lines(&self) -> Vec<String> {
        self.pages
            .iter()
            .flat_map(|p| p.split('\n').map(str::to_string))
            .collect()
    }

    /// Index in [`Self::lines`] of the first line of a 1-based page.
    pub fn first_line_of_page(&self, page_num: usize) -> usize {
        self.pages
            .iter()
            .take(page_num.saturating_sub(1))
            .map(|p| p.split('\n').count())
            .sum()
    }
}

fn clean_page(text: &str) -> String {
    text.replace('\r', "").trim_end_matches('\n').to_string()
}

/// Sync trait implemented by each text backend. Runs inside blocking worker
/// threads, so implementations must be `Send + Sync`.
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn pages(&self, filename: &str, data: &[u8]) -> ExtractResult<ReportDocument>;
}

/// Known provider identifiers used for registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Lopdf,
    PlainText,
}

impl ProviderKind {
    /// Parse a settings value into a provider kind.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lopdf" => Some(Self::Lopdf),
            "plain_text" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn TextProvider> {
        match self {
            Self::Lopdf => Box::new(lopdf_text::LopdfProvider),
            Self::PlainText => Box::new(plain_text::PlainTextProvider),
        }
    }
}
