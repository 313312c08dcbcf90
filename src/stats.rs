//! Statistic extraction: anchor/keyword primitives and the rule engine that
//! drives them from template configuration.
//!
//! Every statistic is evaluated independently. A failing rule blanks its own
//! value and is logged; it never aborts the report.

use crate::error::{ExtractError, ExtractResult};
use crate::locator::{LocatedReport, Table};
use crate::schema::StatisticRow;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which side of a keyword the value sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Left,
    Right,
}

/// Line sequence a text rule reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    #[default]
    Detailed,
    Digital,
}

/// Table a cell rule reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    #[default]
    HighLevel,
    Digital,
}

fn one() -> usize {
    1
}

/// How to find one statistic in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatisticRule {
    /// Non-empty cells strictly between two anchor rows.
    Between {
        above: String,
        below: String,
        column: usize,
    },
    /// Non-empty cells after an anchor row, up to the end of the table.
    Trailing { above: String, column: usize },
    /// The single remaining value of a column once the sentinels are removed.
    ScoreCell {
        #[serde(default)]
        table: TableSource,
        column: usize,
        sentinels: Vec<String>,
    },
    /// Token adjacent to the Nth occurrence of a keyword in the flattened text.
    Keyword {
        #[serde(default)]
        source: LineSource,
        keyword: String,
        /// Tried in order when the primary keyword is not on any line.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        alternatives: Vec<String>,
        #[serde(default)]
        position: Side,
        #[serde(default = "one")]
        occurrence: usize,
    },
    /// Token adjacent to the keyword within the Nth line that contains it.
    LineNeighbor {
        #[serde(default)]
        source: LineSource,
        keyword: String,
        #[serde(default = "one")]
        line_occurrence: usize,
        side: Side,
    },
    /// Second token of the last four characters of the line below a keyword.
    Below {
        #[serde(default)]
        source: LineSource,
        keyword: String,
    },
}

/// A named statistic and its rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticSpec {
    pub name: String,
    pub rule: StatisticRule,
}

impl StatisticSpec {
    pub fn new(name: &str, rule: StatisticRule) -> Self {
        Self {
            name: name.to_string(),
            rule,
        }
    }

    pub fn between(name: &str, above: &str, below: &str, column: usize) -> Self {
        Self::new(
            name,
            StatisticRule::Between {
                above: above.to_string(),
                below: below.to_string(),
                column,
            },
        )
    }

    pub fn trailing(name: &str, above: &str, column: usize) -> Self {
        Self::new(
            name,
            StatisticRule::Trailing {
                above: above.to_string(),
                column,
            },
        )
    }

    pub fn keyword(name: &str, source: LineSource, keyword: &str, position: Side) -> Self {
        Self::new(
            name,
            StatisticRule::Keyword {
                source,
                keyword: keyword.to_string(),
                alternatives: Vec::new(),
                position,
                occurrence: 1,
            },
        )
    }
}

impl StatisticRule {
    /// Evaluate the rule against a located report.
    pub fn evaluate(&self, report: &LocatedReport) -> ExtractResult<String> {
        match self {
            Self::Between {
                above,
                below,
                column,
            } => between_anchors(&report.high_level, above, below, *column),
            Self::Trailing { above, column } => {
                trailing_after_anchor(&report.high_level, above, *column)
            }
            Self::ScoreCell {
                table,
                column,
                sentinels,
            } => {
                let table = match table {
                    TableSource::HighLevel => &report.high_level,
                    TableSource::Digital => &report.digital_table,
                };
                score_cell(table, *column, sentinels)
            }
            Self::Keyword {
                source,
                keyword,
                alternatives,
                position,
                occurrence,
            } => {
                let lines = source_lines(report, *source);
                let keyword = pick_keyword(lines, keyword, alternatives);
                relative_to_keyword(lines, keyword, *position, *occurrence)
            }
            Self::LineNeighbor {
                source,
                keyword,
                line_occurrence,
                side,
            } => line_neighbor(
                source_lines(report, *source),
                keyword,
                *line_occurrence,
                *side,
            ),
            Self::Below { source, keyword } => below_keyword(source_lines(report, *source), keyword),
        }
    }
}

fn source_lines(report: &LocatedReport, source: LineSource) -> &[String] {
    match source {
        LineSource::Detailed => &report.lines,
        LineSource::Digital => &report.digital_lines,
    }
}

fn pick_keyword<'a>(lines: &[String], primary: &'a str, alternatives: &'a [String]) -> &'a str {
    if alternatives.is_empty() {
        return primary;
    }
    std::iter::once(primary)
        .chain(alternatives.iter().map(String::as_str))
        .find(|k| lines.iter().any(|l| l.contains(k)))
        .unwrap_or(primary)
}

/// Run every rule in order, producing one row per statistic.
pub fn extract_statistics(
    report: &LocatedReport,
    specs: &[StatisticSpec],
    filename: &str,
) -> Vec<StatisticRow> {
    let rows: Vec<StatisticRow> = specs
        .iter()
        .map(|spec| {
            let value = match spec.rule.evaluate(report) {
                Ok(value) => value,
                Err(e) => {
                    warn!("{}: statistic '{}' left blank: {}", filename, spec.name, e);
                    String::new()
                }
            };
            StatisticRow {
                statistic: spec.name.clone(),
                value,
                filename: filename.to_string(),
            }
        })
        .collect();

    debug!(
        "{}: {}/{} statistics extracted",
        filename,
        rows.iter().filter(|r| !r.value.is_empty()).count(),
        rows.len()
    );
    rows
}

// ============================================================================
// Table primitives
// ============================================================================

fn column_cells(table: &Table, column: usize) -> ExtractResult<Vec<&str>> {
    table
        .column(column)
        .ok_or_else(|| ExtractError::not_found(format!("column {}", column)))
}

fn find_row(cells: &[&str], anchor: &str) -> ExtractResult<usize> {
    cells
        .iter()
        .position(|c| c.contains(anchor))
        .ok_or_else(|| ExtractError::not_found(format!("anchor '{}'", anchor)))
}

/// Non-empty cells strictly between the first rows containing each anchor,
/// joined with `", "`.
pub fn between_anchors(
    table: &Table,
    above: &str,
    below: &str,
    column: usize,
) -> ExtractResult<String> {
    let cells = column_cells(table, column)?;
    let start = find_row(&cells, above)? + 1;
    let end = find_row(&cells, below)?;
    if start >= end {
        return Ok(String::new());
    }
    Ok(non_empty(&cells[start..end]).join(", "))
}

/// Non-empty cells after the anchor row, joined with `" "`.
pub fn trailing_after_anchor(table: &Table, above: &str, column: usize) -> ExtractResult<String> {
    let cells = column_cells(table, column)?;
    let start = find_row(&cells, above)? + 1;
    Ok(non_empty(&cells[start..]).join(" "))
}

/// First value in the column that is neither empty nor a sentinel. Every
/// non-empty sentinel must be present in the column.
pub fn score_cell(table: &Table, column: usize, sentinels: &[String]) -> ExtractResult<String> {
    let cells = column_cells(table, column)?;
    if let Some(missing) = sentinels
        .iter()
        .find(|s| !s.is_empty() && !cells.contains(&s.as_str()))
    {
        return Err(ExtractError::not_found(format!("sentinel '{}'", missing)));
    }
    cells
        .iter()
        .find(|c| !c.is_empty() && !sentinels.iter().any(|s| s == *c))
        .map(|c| c.to_string())
        .ok_or_else(|| ExtractError::not_found(format!("value in column {}", column)))
}

fn non_empty<'a>(cells: &[&'a str]) -> Vec<&'a str> {
    cells.iter().copied().filter(|c| !c.is_empty()).collect()
}

// ============================================================================
// Text primitives
// ============================================================================

/// Hyphens are used inconsistently around values in the reports.
fn normalize_hyphens(text: &str) -> String {
    text.replace('-', " ")
}

/// Whitespace token immediately before or after the Nth (1-based) occurrence
/// of `keyword` in the flattened, hyphen-normalized text.
pub fn relative_to_keyword(
    lines: &[String],
    keyword: &str,
    side: Side,
    occurrence: usize,
) -> ExtractResult<String> {
    let full_text = normalize_hyphens(&lines.join(" "));
    let keyword = normalize_hyphens(keyword);
    let occurrence = occurrence.max(1);

    let key_index = full_text
        .match_indices(keyword.as_str())
        .nth(occurrence - 1)
        .map(|(idx, _)| idx)
        .ok_or_else(|| {
            ExtractError::not_found(format!("'{}' occurrence {}", keyword, occurrence))
        })?;

    let value = match side {
        Side::Left => full_text[..key_index].split_whitespace().last(),
        Side::Right => full_text[key_index + keyword.len()..]
            .split_whitespace()
            .next(),
    };

    value.map(str::to_string).ok_or_else(|| {
        ExtractError::not_found(format!("value {:?} of '{}'", side, keyword))
    })
}

/// Token before or after `keyword` inside the Nth line containing it.
pub fn line_neighbor(
    lines: &[String],
    keyword: &str,
    line_occurrence: usize,
    side: Side,
) -> ExtractResult<String> {
    let line = lines
        .iter()
        .filter(|l| l.contains(keyword))
        .nth(line_occurrence.max(1) - 1)
        .ok_or_else(|| {
            ExtractError::not_found(format!("line {} with '{}'", line_occurrence, keyword))
        })?;

    let normalized = normalize_hyphens(line);
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    let pos = tokens
        .iter()
        .position(|t| *t == keyword)
        .ok_or_else(|| ExtractError::not_found(format!("token '{}'", keyword)))?;

    let value = match side {
        Side::Left => pos.checked_sub(1).and_then(|i| tokens.get(i)),
        Side::Right => tokens.get(pos + 1),
    };
    value
        .map(|v| v.to_string())
        .ok_or_else(|| ExtractError::not_found(format!("value {:?} of '{}'", side, keyword)))
}

/// Value from the line under `keyword`: the last four characters of that
/// line, split on a single space, second token. Calibrated to one layout.
pub fn below_keyword(lines: &[String], keyword: &str) -> ExtractResult<String> {
    let idx = lines
        .iter()
        .position(|l| l.contains(keyword))
        .ok_or_else(|| ExtractError::not_found(format!("'{}'", keyword)))?;

    let next = lines
        .get(idx + 1)
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ExtractError::not_found(format!("line below '{}'", keyword)))?;

    let chars: Vec<char> = next.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    tail.split(' ')
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| ExtractError::not_found(format!("token below '{}'", keyword)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Table {
        Table::from_rows(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn high_level() -> Table {
        table(&[
            &["Dealer name", "Location", "Global Score"],
            &["ACME Motors", "12 Main Street", ""],
            &["", "Brussels, Belgium", "85%"],
            &["Dealer code", "RRG", ""],
            &["D-1234", "RRG North", ""],
            &["Auditor", "Audit Date", ""],
            &["Jane", "2024-03-01", ""],
            &["Roe", "", ""],
        ])
    }

    fn report() -> LocatedReport {
        LocatedReport {
            high_level: high_level(),
            digital_table: table(&[&["x", "y", "Digital Score"], &["", "", "72%"]]),
            lines: lines(&[
                "GLOBAL 85%",
                "NEW VEHICLES ACTIVITY 42% AFTERSALES ACTIVITY 55%",
                "78% RECEPTION",
                "MANAGEMENT",
                "66% MANAGEMENT - 71%",
                "Preparation / Delivery",
                "90% Preparation / Delivery",
            ]),
            digital_lines: lines(&[
                "DIGITAL DACIA 80%",
                "75% JOURNEY 60% JOURNEY",
                "Digital Score",
                "Dacia 64%",
            ]),
        }
    }

    #[test]
    fn test_between_anchors() {
        let t = table(&[&["Dealer name"], &["ACME Motors"], &[""], &["Dealer code"]]);
        assert_eq!(between_anchors(&t, "Dealer name", "Dealer code", 0).unwrap(), "ACME Motors");
    }

    #[test]
    fn test_between_anchors_joins_with_comma() {
        let value = between_anchors(&high_level(), "Location", "RRG", 1).unwrap();
        assert_eq!(value, "12 Main Street, Brussels, Belgium");
    }

    #[test]
    fn test_between_anchors_missing_anchor() {
        let err = between_anchors(&high_level(), "Dealer name", "Workshop", 0).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound { .. }));
        assert!(between_anchors(&high_level(), "Dealer name", "Dealer code", 9).is_err());
    }

    #[test]
    fn test_between_anchors_inverted_is_empty() {
        let value = between_anchors(&high_level(), "Dealer code", "Dealer name", 0).unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn test_trailing_after_anchor() {
        assert_eq!(trailing_after_anchor(&high_level(), "Auditor", 0).unwrap(), "Jane Roe");
        assert_eq!(trailing_after_anchor(&high_level(), "Audit Date", 1).unwrap(), "2024-03-01");
    }

    #[test]
    fn test_score_cell() {
        let sentinels = vec!["Global Score".to_string(), String::new()];
        assert_eq!(score_cell(&high_level(), 2, &sentinels).unwrap(), "85%");

        let missing = vec!["Digital Score".to_string()];
        assert!(score_cell(&high_level(), 2, &missing).is_err());
    }

    #[test]
    fn test_relative_to_keyword_right() {
        let text = lines(&["... NEW VEHICLES ACTIVITY 42% AFTERSALES ..."]);
        let value = relative_to_keyword(&text, "NEW VEHICLES ACTIVITY", Side::Right, 1).unwrap();
        assert_eq!(value, "42%");
    }

    #[test]
    fn test_relative_to_keyword_spans_lines() {
        let value = relative_to_keyword(&report().lines, "RECEPTION", Side::Left, 1).unwrap();
        assert_eq!(value, "78%");
        let value = relative_to_keyword(&report().lines, "GLOBAL", Side::Right, 1).unwrap();
        assert_eq!(value, "85%");
    }

    #[test]
    fn test_relative_to_keyword_occurrence() {
        let digital = report().digital_lines;
        assert_eq!(relative_to_keyword(&digital, "JOURNEY", Side::Left, 1).unwrap(), "75%");
        assert_eq!(relative_to_keyword(&digital, "JOURNEY", Side::Left, 2).unwrap(), "60%");
        assert!(relative_to_keyword(&digital, "JOURNEY", Side::Left, 3).is_err());
    }

    #[test]
    fn test_relative_to_keyword_normalizes_hyphens() {
        let text = lines(&["PRODUCTION-88%"]);
        assert_eq!(relative_to_keyword(&text, "PRODUCTION", Side::Right, 1).unwrap(), "88%");
    }

    #[test]
    fn test_relative_to_keyword_no_token() {
        let text = lines(&["RESTITUTION"]);
        assert!(relative_to_keyword(&text, "RESTITUTION", Side::Left, 1).is_err());
    }

    #[test]
    fn test_line_neighbor() {
        let l = report().lines;
        assert_eq!(line_neighbor(&l, "MANAGEMENT", 2, Side::Left).unwrap(), "66%");
        assert_eq!(line_neighbor(&l, "MANAGEMENT", 2, Side::Right).unwrap(), "71%");
        assert!(line_neighbor(&l, "MANAGEMENT", 1, Side::Left).is_err());
    }

    #[test]
    fn test_below_keyword() {
        let digital = report().digital_lines;
        assert_eq!(below_keyword(&digital, "Digital Score").unwrap(), "64%");

        let text = lines(&["Digital Score", "Digital 5 %"]);
        assert_eq!(below_keyword(&text, "Digital Score").unwrap(), "5");

        let no_space = lines(&["Digital Score", "100%"]);
        assert!(below_keyword(&no_space, "Digital Score").is_err());

        let last = lines(&["Digital Score"]);
        assert!(below_keyword(&last, "Digital Score").is_err());
    }

    #[test]
    fn test_keyword_alternatives() {
        let rule = StatisticRule::Keyword {
            source: LineSource::Detailed,
            keyword: "PREPARATION / DELIVERY".to_string(),
            alternatives: vec!["Preparation / Delivery".to_string()],
            position: Side::Left,
            occurrence: 1,
        };
        assert_eq!(rule.evaluate(&report()).unwrap(), "71%");
    }

    #[test]
    fn test_extract_statistics_blanks_failures() {
        let specs = vec![
            StatisticSpec::between("name1", "Dealer name", "Dealer code", 0),
            StatisticSpec::keyword("missing", LineSource::Detailed, "NOT THERE", Side::Left),
            StatisticSpec::keyword("digital_dacia", LineSource::Digital, "DIGITAL DACIA", Side::Right),
            StatisticSpec::new(
                "digital_score",
                StatisticRule::ScoreCell {
                    table: TableSource::Digital,
                    column: 2,
                    sentinels: vec!["Digital Score".to_string(), String::new()],
                },
            ),
        ];
        let rows = extract_statistics(&report(), &specs, "a.pdf");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].value, "ACME Motors");
        assert_eq!(rows[1].statistic, "missing");
        assert_eq!(rows[1].value, "");
        assert_eq!(rows[2].value, "80%");
        assert_eq!(rows[3].value, "72%");
        assert!(rows.iter().all(|r| r.filename == "a.pdf"));
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{"name": "management1", "rule": {"kind": "line_neighbor", "keyword": "MANAGEMENT", "line_occurrence": 2, "side": "left"}}"#;
        let spec: StatisticSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            spec.rule,
            StatisticRule::LineNeighbor {
                source: LineSource::Detailed,
                keyword: "MANAGEMENT".to_string(),
                line_occurrence: 2,
                side: Side::Left,
            }
        );
    }
}
