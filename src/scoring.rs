//! Dealer scoring and verbatim sheets derived from the aggregate tables.

use crate::aggregate::AggregateOutput;
use crate::config::{CountryMapping, TemplateConfig};
use crate::error::ExtractResult;
use crate::reference::ScoringReference;
use crate::schema::{QaRow, Status};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Row-major table of display strings; the first row is the header.
pub type Sheet = Vec<Vec<String>>;

const MISSING: &str = "-";
const SCORE_COLUMN: &str = "Question scoring";
const GLOBAL_SCORE: &str = "Global_Score";
const ADDRESS: &str = "address_full";

/// One question's scores across files.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionScore {
    pub question_number: String,
    /// One cell per requested filename, `"-"` when absent or unscorable.
    pub per_file: Vec<String>,
    /// Mean as a percentage string, `"-"` when nothing was scorable.
    pub average: String,
}

/// Numeric value of a status, `None` when the status does not count.
pub fn status_score(status: Status, scores: &BTreeMap<String, f64>) -> Option<f64> {
    if !status.is_scored() {
        return None;
    }
    scores.get(status.code()).copied()
}

/// First number in a statistic value such as `"85,5 %"`.
pub fn parse_score(value: &str) -> Option<f64> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NUMBER
        .get_or_init(|| Regex::new(r"-?\d+(?:[.,]\d+)?").ok())
        .as_ref()?;
    re.find(value)?.as_str().replace(',', ".").parse().ok()
}

/// Per-question scores for `filenames`, questions in first-seen order.
pub fn question_scoring(
    qa_rows: &[QaRow],
    filenames: &[String],
    scores: &BTreeMap<String, f64>,
) -> Vec<QuestionScore> {
    let mut order: Vec<&str> = Vec::new();
    let mut cells: HashMap<(&str, &str), Option<f64>> = HashMap::new();
    for row in qa_rows {
        if !order.contains(&row.question_number.as_str()) {
            order.push(&row.question_number);
        }
        cells
            .entry((row.question_number.as_str(), row.filename.as_str()))
            .or_insert_with(|| status_score(row.status, scores));
    }

    order
        .into_iter()
        .map(|number| {
            let values: Vec<Option<f64>> = filenames
                .iter()
                .map(|f| cells.get(&(number, f.as_str())).copied().flatten())
                .collect();
            let scored: Vec<f64> = values.iter().flatten().copied().collect();
            let average = if scored.is_empty() {
                MISSING.to_string()
            } else {
                format_percentage(scored.iter().sum::<f64>() / scored.len() as f64)
            };
            QuestionScore {
                question_number: number.to_string(),
                per_file: values
                    .into_iter()
                    .map(|v| v.map_or_else(|| MISSING.to_string(), |s| s.to_string()))
                    .collect(),
                average,
            }
        })
        .collect()
}

/// `0.6667` -> `"66.67%"`, `1.0` -> `"100.0%"`.
fn format_percentage(mean: f64) -> String {
    let pct = (mean * 10_000.0).round() / 100.0;
    if pct.fract() == 0.0 {
        format!("{:.1}%", pct)
    } else {
        format!("{}%", pct)
    }
}

/// Country label for an address. First case-insensitive match wins.
pub fn country_for(address: &str, countries: &[CountryMapping]) -> Option<String> {
    let address = address.to_lowercase();
    countries
        .iter()
        .find(|c| address.contains(&c.key.to_lowercase()))
        .map(|c| c.label.clone())
}

/// Report filenames ordered by global score, best first.
fn ranked_filenames(aggregate: &AggregateOutput) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names: Vec<String> = aggregate
        .statistics
        .iter()
        .map(|r| r.filename.clone())
        .chain(aggregate.qa_results.iter().map(|r| r.filename.clone()))
        .filter(|f| seen.insert(f.clone()))
        .collect();

    let score = |f: &str| {
        aggregate
            .statistic(f, GLOBAL_SCORE)
            .and_then(parse_score)
            .unwrap_or(f64::NEG_INFINITY)
    };
    names.sort_by(|a, b| score(b).total_cmp(&score(a)).then_with(|| a.cmp(b)));
    names
}

/// Build the dealer scoring sheet.
///
/// Columns: question number, reference columns (if any), question average,
/// row label, then one column per report. Required statistics come first,
/// then one row per question.
pub fn dealer_scoring(
    aggregate: &AggregateOutput,
    template: &TemplateConfig,
    reference: Option<&ScoringReference>,
) -> Sheet {
    let scoring = &template.scoring;
    let filenames = ranked_filenames(aggregate);
    let ref_headers: &[String] = reference.map(|r| r.headers.as_slice()).unwrap_or(&[]);
    let blank_ref = vec![String::new(); ref_headers.len()];

    let mut header = vec!["index".to_string()];
    header.extend(ref_headers.iter().cloned());
    header.push(SCORE_COLUMN.to_string());
    header.push("header_name".to_string());
    header.extend(filenames.iter().cloned());

    let mut sheet = vec![header];

    let last_stat = scoring.required_statistics.len().saturating_sub(1);
    for (idx, statistic) in scoring.required_statistics.iter().enumerate() {
        let mut row = vec![statistic.clone()];
        row.extend(blank_ref.iter().cloned());
        // The last statistic row labels the question block below it.
        row.push(if idx == last_stat {
            SCORE_COLUMN.to_string()
        } else {
            String::new()
        });
        row.push(
            scoring
                .header_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| statistic.clone()),
        );
        for filename in &filenames {
            let value = aggregate.statistic(filename, statistic).unwrap_or_default();
            let cell = if statistic == ADDRESS {
                country_for(value, &scoring.countries).unwrap_or_default()
            } else {
                value.to_string()
            };
            row.push(cell);
        }
        sheet.push(row);
    }

    let questions = question_scoring(&aggregate.qa_results, &filenames, &scoring.status_scores);
    for question in questions {
        let mut row = vec![question.question_number.clone()];
        match reference.and_then(|r| r.get(&question.question_number)) {
            Some(values) => {
                let mut values = values.to_vec();
                values.resize(ref_headers.len(), String::new());
                row.extend(values);
            }
            None => row.extend(blank_ref.iter().cloned()),
        }
        row.push(question.average);
        row.push(String::new());
        row.extend(question.per_file);
        sheet.push(row);
    }

    let scores: Vec<f64> = filenames
        .iter()
        .filter_map(|f| aggregate.statistic(f, GLOBAL_SCORE).and_then(parse_score))
        .collect();
    if !scores.is_empty() {
        info!(
            "Dealer scoring: {} reports, mean global score {:.2}",
            filenames.len(),
            scores.iter().sum::<f64>() / scores.len() as f64
        );
    }

    sheet
}

/// Commented answers joined with dealer id and name.
pub fn verbatim(aggregate: &AggregateOutput) -> Sheet {
    let mut sheet = vec![vec![
        "Dealer ID".to_string(),
        "Dealer Name".to_string(),
        "Question Number".to_string(),
        "Comment".to_string(),
    ]];

    for row in &aggregate.qa_results {
        if row.status == Status::Unscored || row.pre_comment.trim().is_empty() {
            continue;
        }
        let (Some(code), Some(name)) = (
            aggregate.statistic(&row.filename, "dealer_code"),
            aggregate.statistic(&row.filename, "name1"),
        ) else {
            continue;
        };
        sheet.push(vec![
            code.to_string(),
            name.to_string(),
            row.question_number.clone(),
            row.answer.clone(),
        ]);
    }

    debug!("Verbatim: {} commented answers", sheet.len() - 1);
    sheet
}

/// Write a sheet as CSV, creating the parent directory if needed.
pub fn write_sheet(path: &Path, sheet: &Sheet) -> ExtractResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    for row in sheet {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {:?}", sheet.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_default_config;
    use crate::schema::{ReportExtraction, StatisticRow};

    fn qa(number: &str, status: Status, pre: &str, filename: &str) -> QaRow {
        QaRow {
            question_number: number.to_string(),
            question: format!("Question {}", number),
            answer: format!("{}{} - done", pre, status.code()),
            status,
            pre_comment: pre.to_string(),
            post_comment: "done".to_string(),
            filename: filename.to_string(),
        }
    }

    fn stat(statistic: &str, value: &str, filename: &str) -> StatisticRow {
        StatisticRow {
            statistic: statistic.to_string(),
            value: value.to_string(),
            filename: filename.to_string(),
        }
    }

    fn aggregate() -> AggregateOutput {
        let mut output = AggregateOutput::default();
        output.append(ReportExtraction {
            filename: "a.pdf".to_string(),
            statistics: vec![
                stat("name1", "ACME Motors", "a.pdf"),
                stat("dealer_code", "D-1", "a.pdf"),
                stat("address_full", "12 Rue Haute, Brussels, BELGIUM", "a.pdf"),
                stat("Global_Score", "70 %", "a.pdf"),
            ],
            qa_results: vec![
                qa("1", Status::Ok, "", "a.pdf"),
                qa("2", Status::Pa, "Leaflets missing ", "a.pdf"),
                qa("3", Status::Na, "n/a ", "a.pdf"),
            ],
        });
        output.append(ReportExtraction {
            filename: "b.pdf".to_string(),
            statistics: vec![
                stat("name1", "Best Cars", "b.pdf"),
                stat("Global_Score", "91,5%", "b.pdf"),
            ],
            qa_results: vec![
                qa("1", Status::Ko, "Dirty ", "b.pdf"),
                qa("2", Status::Ok, "", "b.pdf"),
            ],
        });
        output
    }

    #[test]
    fn test_status_score() {
        let scores = create_default_config().scoring.status_scores;
        assert_eq!(status_score(Status::Ok, &scores), Some(1.0));
        assert_eq!(status_score(Status::Pa, &scores), Some(0.5));
        assert_eq!(status_score(Status::Ne, &scores), Some(0.0));
        assert_eq!(status_score(Status::Na, &scores), None);
        assert_eq!(status_score(Status::Unscored, &scores), None);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("85%"), Some(85.0));
        assert_eq!(parse_score("Score: 91,5 %"), Some(91.5));
        assert_eq!(parse_score("n/a"), None);
    }

    #[test]
    fn test_question_scoring() {
        let scores = create_default_config().scoring.status_scores;
        let rows = vec![
            qa("7", Status::Ok, "", "a.pdf"),
            qa("7", Status::Ok, "", "b.pdf"),
            qa("7", Status::Ko, "", "c.pdf"),
            qa("8", Status::Na, "", "a.pdf"),
        ];
        let files: Vec<String> = ["a.pdf", "b.pdf", "c.pdf", "d.pdf"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = question_scoring(&rows, &files, &scores);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].question_number, "7");
        assert_eq!(result[0].per_file, vec!["1", "1", "0", "-"]);
        assert_eq!(result[0].average, "66.67%");
        assert_eq!(result[1].per_file, vec!["-", "-", "-", "-"]);
        assert_eq!(result[1].average, "-");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(1.0), "100.0%");
        assert_eq!(format_percentage(0.25), "25.0%");
        assert_eq!(format_percentage(0.123456), "12.35%");
    }

    #[test]
    fn test_country_for() {
        let countries = create_default_config().scoring.countries;
        assert_eq!(
            country_for("Brussels, BELGIUM", &countries).as_deref(),
            Some("Belgium")
        );
        assert_eq!(country_for("Nowhere", &countries), None);
    }

    #[test]
    fn test_dealer_scoring_layout() {
        let template = create_default_config();
        let sheet = dealer_scoring(&aggregate(), &template, None);

        // Ranked by global score: b.pdf (91.5) before a.pdf (70).
        assert_eq!(
            sheet[0],
            vec!["index", "Question scoring", "header_name", "b.pdf", "a.pdf"]
        );
        assert_eq!(sheet[1], vec!["name1", "", "DEALERNAME", "Best Cars", "ACME Motors"]);
        assert_eq!(sheet[2], vec!["address_full", "", "COUNTRY", "", "Belgium"]);

        let stats = template.scoring.required_statistics.len();
        assert_eq!(sheet[stats][1], "Question scoring");
        assert_eq!(sheet[stats + 1], vec!["1", "50.0%", "", "0", "1"]);
        assert_eq!(sheet[stats + 2], vec!["2", "75.0%", "", "1", "0.5"]);
        assert_eq!(sheet[stats + 3], vec!["3", "-", "", "-", "-"]);
        assert_eq!(sheet.len(), 1 + stats + 3);
    }

    #[test]
    fn test_verbatim_requires_comment_status_and_dealer() {
        let sheet = verbatim(&aggregate());
        // b.pdf has no dealer_code, a.pdf question 1 has no comment.
        assert_eq!(sheet.len(), 3);
        assert_eq!(sheet[1][0], "D-1");
        assert_eq!(sheet[1][1], "ACME Motors");
        assert_eq!(sheet[1][2], "2");
        assert_eq!(sheet[1][3], "Leaflets missing PA - done");
        assert_eq!(sheet[2][2], "3");
    }

    #[test]
    fn test_write_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("verbatim.csv");
        write_sheet(&path, &verbatim(&aggregate())).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Dealer ID,Dealer Name,Question Number,Comment\n"));
    }
}
