//! Provider for pre-extracted text dumps: UTF-8, pages separated by form feed.

use super::{ReportDocument, TextProvider};
use crate::error::{ExtractError, ExtractResult};

pub const PAGE_BREAK: char = '\x0c';

pub struct PlainTextProvider;

impl TextProvider for PlainTextProvider {
    fn name(&self) -> &str {
        "plain_text"
    }

    fn pages(&self, filename: &str, data: &[u8]) -> ExtractResult<ReportDocument> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ExtractError::Pdf(format!("{} is not UTF-8 text: {}", filename, e)))?;
        Ok(ReportDocument::new(
            text.split(PAGE_BREAK).map(str::to_string).collect(),
        ))
    }
}
