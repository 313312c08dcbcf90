//! Table and line-sequence location for a single report.
//!
//! Tables are recovered from the text layout alone: consecutive lines that
//! look columnar form a block, and character positions that are blank in
//! every line of the block become column gutters.

use crate::config::LayoutConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::pdf::ReportDocument;
use tracing::debug;

/// Minimum run of blank positions that separates two columns.
const MIN_GAP: usize = 2;

const TAB_WIDTH: usize = 4;

/// Rectangular table of trimmed cell strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, padding short rows with empty cells.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Cell values of one column, top to bottom. `None` if out of range.
    pub fn column(&self, idx: usize) -> Option<Vec<&str>> {
        if idx >= self.width() {
            return None;
        }
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

/// Everything the extractors need from one report.
#[derive(Debug, Clone)]
pub struct LocatedReport {
    pub high_level: Table,
    pub digital_table: Table,
    pub lines: Vec<String>,
    pub digital_lines: Vec<String>,
}

/// Locate the summary tables and line sequences of a report.
pub fn locate(doc: &ReportDocument, layout: &LayoutConfig) -> ExtractResult<LocatedReport> {
    let high_level = first_table_on_page(doc, layout.high_level_page)?;
    let digital_table = first_table_on_page(doc, layout.digital_page)?;

    let lines = doc.lines();
    let search_from = doc.first_line_of_page(layout.digital_page);
    let search_to = doc
        .first_line_of_page(layout.digital_page + 1)
        .min(lines.len());
    let marker_idx = lines
        .iter()
        .enumerate()
        .take(search_to)
        .skip(search_from)
        .find(|(_, line)| line.contains(&layout.digital_marker))
        .map(|(idx, _)| idx)
        .ok_or_else(|| {
            ExtractError::MalformedTemplate(format!(
                "digital marker '{}' not found",
                layout.digital_marker
            ))
        })?;
    let digital_lines = lines[marker_idx..search_to].to_vec();

    debug!(
        "Located tables {}x{} / {}x{}, {} lines ({} digital)",
        high_level.len(),
        high_level.width(),
        digital_table.len(),
        digital_table.width(),
        lines.len(),
        digital_lines.len()
    );

    Ok(LocatedReport {
        high_level,
        digital_table,
        lines,
        digital_lines,
    })
}

fn first_table_on_page(doc: &ReportDocument, page: usize) -> ExtractResult<Table> {
    let text = doc.page(page).ok_or(ExtractError::TableNotFound { page })?;
    detect_tables(text)
        .into_iter()
        .next()
        .ok_or(ExtractError::TableNotFound { page })
}

/// Detect every table on a page, in top-to-bottom order.
pub fn detect_tables(page: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut block: Vec<Vec<char>> = Vec::new();

    for raw in page.lines() {
        let line: Vec<char> = raw
            .replace('\t', &" ".repeat(TAB_WIDTH))
            .trim_end()
            .chars()
            .collect();
        if is_table_line(&line) {
            block.push(line);
        } else {
            flush_block(&mut block, &mut tables);
        }
    }
    flush_block(&mut block, &mut tables);

    tables
}

fn is_table_line(line: &[char]) -> bool {
    let leading = line.iter().take_while(|c| **c == ' ').count();
    if leading == line.len() {
        return false;
    }
    leading >= MIN_GAP || has_internal_gap(&line[leading..])
}

fn has_internal_gap(line: &[char]) -> bool {
    let mut run = 0;
    for c in line {
        if *c == ' ' {
            run += 1;
            if run >= MIN_GAP {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn flush_block(block: &mut Vec<Vec<char>>, tables: &mut Vec<Table>) {
    if block.len() >= 2 {
        if let Some(table) = split_columns(block) {
            tables.push(table);
        }
    }
    block.clear();
}

fn split_columns(block: &[Vec<char>]) -> Option<Table> {
    let width = block.iter().map(Vec::len).max().unwrap_or(0);
    let occupied: Vec<bool> = (0..width)
        .map(|p| block.iter().any(|l| l.get(p).is_some_and(|c| *c != ' ')))
        .collect();

    let spans = column_spans(&occupied);
    if spans.len() < 2 {
        return None;
    }

    let rows: Vec<Vec<String>> = block
        .iter()
        .map(|line| {
            spans
                .iter()
                .map(|&(start, end)| {
                    if start >= line.len() {
                        return String::new();
                    }
                    line[start..end.min(line.len())]
                        .iter()
                        .collect::<String>()
                        .trim()
                        .to_string()
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();

    if rows.is_empty() {
        return None;
    }
    Some(Table::from_rows(rows))
}

/// Maximal occupied spans, merging gaps narrower than [`MIN_GAP`].
fn column_spans(occupied: &[bool]) -> Vec<(usize, usize)> {
    let width = occupied.len();
    let mut spans = Vec::new();
    let mut p = 0;

    while p < width {
        if !occupied[p] {
            p += 1;
            continue;
        }
        let start = p;
        let mut end = p;
        while p < width {
            if occupied[p] {
                p += 1;
                end = p;
            } else {
                let gap_start = p;
                while p < width && !occupied[p] {
                    p += 1;
                }
                if p - gap_start >= MIN_GAP || p >= width {
                    break;
                }
            }
        }
        spans.push((start, end));
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{relative_to_keyword, Side};

    fn row3(a: &str, b: &str, c: &str) -> String {
        format!("{:<24}{:<24}{}", a, b, c)
    }

    fn layout() -> LayoutConfig {
        LayoutConfig {
            high_level_page: 1,
            digital_page: 3,
            digital_marker: "DIGITAL".to_string(),
        }
    }

    fn summary_page() -> String {
        [
            "AUDIT REPORT".to_string(),
            row3("Dealer name", "Location", "Global Score"),
            row3("ACME Motors", "12 Main Street", ""),
            row3("", "Brussels, Belgium", "85%"),
            row3("Dealer code", "RRG", ""),
        ]
        .join("\n")
    }

    #[test]
    fn test_detect_aligned_table() {
        let tables = detect_tables(&summary_page());
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.width(), 3);
        assert_eq!(
            table.column(0).unwrap(),
            vec!["Dealer name", "ACME Motors", "", "Dealer code"]
        );
        assert_eq!(
            table.column(2).unwrap(),
            vec!["Global Score", "", "85%", ""]
        );
        assert!(table.column(3).is_none());
    }

    #[test]
    fn test_single_spaces_do_not_split_columns() {
        let page = "Name of dealer    Code\nACME Motors Ltd    D-1";
        let tables = detect_tables(page);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows()[1], vec!["ACME Motors Ltd", "D-1"]);
    }

    #[test]
    fn test_prose_is_not_a_table() {
        let page = "This is a paragraph.\nIt has no columns at all.\n";
        assert!(detect_tables(page).is_empty());
    }

    #[test]
    fn test_tables_split_by_prose() {
        let page = "a    b\nc    d\nsome prose line\ne    f\ng    h";
        let tables = detect_tables(page);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].rows()[0], vec!["e", "f"]);
    }

    #[test]
    fn test_table_from_rows_pads() {
        let table = Table::from_rows(vec![
            vec!["a".to_string()],
            vec!["b".to_string(), "c".to_string()],
        ]);
        assert_eq!(table.width(), 2);
        assert_eq!(table.column(1).unwrap(), vec!["", "c"]);
    }

    #[test]
    fn test_locate_report() {
        let digital = [
            "DIGITAL DACIA 80%".to_string(),
            row3("Digital Score", "Renault", "x"),
            row3("70 %", "b", "c"),
        ]
        .join("\n");
        let doc = ReportDocument::new(vec![
            summary_page(),
            "Detailed page\nMANAGEMENT".to_string(),
            digital,
        ]);
        let located = locate(&doc, &layout()).unwrap();
        assert_eq!(located.high_level.width(), 3);
        assert_eq!(located.digital_table.rows()[0][0], "Digital Score");
        assert_eq!(located.digital_lines[0], "DIGITAL DACIA 80%");
        assert_eq!(located.lines.len(), 5 + 2 + 3);
    }

    #[test]
    fn test_digital_lines_stop_at_page_end() {
        let digital = [
            "DIGITAL DACIA 80%".to_string(),
            row3("Digital Score", "Renault", "x"),
            row3("70 %", "b", "c"),
        ]
        .join("\n");
        let doc = ReportDocument::new(vec![
            summary_page(),
            "Detailed page".to_string(),
            format!("{}\nJOURNEY", digital),
            "Appendix\n99% JOURNEY".to_string(),
        ]);
        let located = locate(&doc, &layout()).unwrap();
        assert_eq!(located.digital_lines.len(), 4);
        assert_eq!(located.digital_lines.last().unwrap(), "JOURNEY");
        assert!(matches!(
            relative_to_keyword(&located.digital_lines, "JOURNEY", Side::Left, 2),
            Err(ExtractError::NotFound { .. })
        ));
    }

    #[test]
    fn test_locate_missing_table() {
        let doc = ReportDocument::new(vec![summary_page(), "x".to_string()]);
        let err = locate(&doc, &layout()).unwrap_err();
        assert!(matches!(err, ExtractError::TableNotFound { page: 3 }));
    }

    #[test]
    fn test_locate_missing_marker() {
        let doc = ReportDocument::new(vec![
            summary_page(),
            "DIGITAL appears too early".to_string(),
            ["no marker here", "a    b", "c    d"].join("\n"),
        ]);
        let err = locate(&doc, &layout()).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedTemplate(_)));
    }
}
