//! Question detection and answer slicing over a report's line sequence.

use crate::classifier::classify;
use crate::config::QaConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::schema::{QaRow, Question};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use tracing::debug;

/// Canonical first lines of every question in a template.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    first_lines: HashSet<String>,
}

impl QuestionBank {
    /// Build from reference first lines. Embedded newlines are dropped and
    /// entries trimmed, matching how report lines are compared.
    pub fn new<I, S>(first_lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            first_lines: first_lines
                .into_iter()
                .map(|q| q.as_ref().replace('\n', "").trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
        }
    }

    pub fn is_question(&self, line: &str) -> bool {
        self.first_lines.contains(line.trim())
    }

    pub fn len(&self) -> usize {
        self.first_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_lines.is_empty()
    }
}

/// A detected question and the line range of its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSpan {
    pub question: Question,
    /// Index of the question's first line.
    pub start: usize,
    pub answer: Range<usize>,
}

/// Restrict the full line sequence to the QA region: from the first question
/// up to the closing marker, followed by the digital questions. Bare numbers
/// and activity score labels are dropped.
pub fn filter_answer_lines(lines: &[String], qa: &QaConfig) -> ExtractResult<Vec<String>> {
    let above = lines
        .iter()
        .position(|l| l.contains(&qa.first_question))
        .ok_or_else(|| malformed("first question", &qa.first_question))?;

    let end_marker = qa.end_marker.to_lowercase();
    let below = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.to_lowercase().contains(&end_marker))
        .nth(qa.end_marker_occurrence.max(1) - 1)
        .map(|(idx, _)| idx)
        .ok_or_else(|| malformed("end marker", &qa.end_marker))?;

    let digital = lines
        .iter()
        .position(|l| l.contains(&qa.digital_first_question))
        .ok_or_else(|| malformed("digital first question", &qa.digital_first_question))?;

    let main = if above < below {
        &lines[above..below]
    } else {
        &lines[..0]
    };

    Ok(main
        .iter()
        .chain(lines[digital..].iter())
        .filter(|l| !is_numeric(l) && !is_activity(l, &qa.activities))
        .cloned()
        .collect())
}

fn malformed(what: &str, anchor: &str) -> ExtractError {
    ExtractError::MalformedTemplate(format!("{} '{}' not found", what, anchor))
}

fn is_numeric(line: &str) -> bool {
    !line.is_empty() && line.chars().all(char::is_numeric)
}

fn is_activity(line: &str, activities: &[String]) -> bool {
    let label = line.trim_start_matches(|c: char| c.is_ascii_digit() || c == ' ');
    activities.iter().any(|a| a == label)
}

/// Split `"54 - Is the facade ..."` into number and text at the first hyphen.
fn split_number(line: &str) -> (String, String) {
    match line.split_once('-') {
        Some((number, text)) => (number.trim().to_string(), text.trim().to_string()),
        None => (String::new(), line.trim().to_string()),
    }
}

/// Find every question and the answer range that follows it.
///
/// Answers run from just after the question's (possibly multi-line) label to
/// just before the next question; the last one runs to the end of `lines`.
pub fn segment(
    lines: &[String],
    bank: &QuestionBank,
    multi_line: &BTreeMap<String, usize>,
) -> Vec<QuestionSpan> {
    let mut found: Vec<(usize, usize, Question)> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if !bank.is_question(line) {
            continue;
        }
        let (number, mut text) = split_number(line);
        let extra = multi_line.get(&number).copied().unwrap_or(0);
        if extra > 0 {
            let end = (idx + extra + 1).min(lines.len());
            text = split_number(&lines[idx..end].join(" ")).1;
        }
        found.push((idx, extra, Question { number, text }));
    }

    let starts: Vec<usize> = found
        .iter()
        .map(|(start, _, _)| *start)
        .chain(std::iter::once(lines.len()))
        .collect();

    found
        .into_iter()
        .enumerate()
        .map(|(i, (start, extra, question))| {
            let end = starts[i + 1];
            let answer_start = (start + 1 + extra).min(end);
            QuestionSpan {
                question,
                start,
                answer: answer_start..end,
            }
        })
        .collect()
}

/// Detect questions, slice their answers and classify each answer.
pub fn detect_quality_assessment(
    lines: &[String],
    bank: &QuestionBank,
    multi_line: &BTreeMap<String, usize>,
    filename: &str,
) -> Vec<QaRow> {
    let spans = segment(lines, bank, multi_line);
    debug!("{}: {} questions detected", filename, spans.len());

    spans
        .into_iter()
        .map(|span| {
            let answer = lines[span.answer].join("\n");
            let classification = classify(&answer);
            QaRow {
                question_number: span.question.number,
                question: span.question.text,
                answer,
                status: classification.status,
                pre_comment: classification.pre_comment,
                post_comment: classification.post_comment,
                filename: filename.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_default_config;
    use crate::schema::Status;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn overrides(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_multi_line_question() {
        let bank = QuestionBank::new(["54-Is the"]);
        let text = lines(&["54-Is the", "facade compliant?", "OK - yes"]);
        let spans = segment(&text, &bank, &overrides(&[("54", 1)]));

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].question.number, "54");
        assert_eq!(spans[0].question.text, "Is the facade compliant?");
        assert_eq!(spans[0].answer, 2..3);

        let rows = detect_quality_assessment(&text, &bank, &overrides(&[("54", 1)]), "r.pdf");
        assert_eq!(rows[0].answer, "OK - yes");
        assert_eq!(rows[0].status, Status::Ok);
        assert_eq!(rows[0].post_comment, "yes");
    }

    #[test]
    fn test_spans_do_not_overlap() {
        let bank = QuestionBank::new(["1 - Facade is clean", "2 - Showroom is tidy", "41b - Signage"]);
        let text = lines(&[
            "1 - Facade is clean",
            "Clean and bright OK - good",
            "2 - Showroom is tidy",
            "41b - Signage",
            "present on",
            "KO – missing",
            "more notes",
        ]);
        let spans = segment(&text, &bank, &overrides(&[("41b", 1)]));

        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].answer, 1..2);
        assert_eq!(spans[1].answer, 3..3);
        assert_eq!(spans[2].question.text, "Signage present on");
        assert_eq!(spans[2].answer, 5..7);
        for pair in spans.windows(2) {
            assert!(pair[0].answer.end <= pair[1].start);
        }
    }

    #[test]
    fn test_question_lines_are_trimmed() {
        let bank = QuestionBank::new(["  3 - Parking\n"]);
        let text = lines(&["   3 - Parking  ", "NE - not evaluated"]);
        let rows = detect_quality_assessment(&text, &bank, &BTreeMap::new(), "r.pdf");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].question_number, "3");
        assert_eq!(rows[0].question, "Parking");
        assert_eq!(rows[0].status, Status::Ne);
        assert_eq!(rows[0].filename, "r.pdf");
    }

    #[test]
    fn test_override_past_next_question_is_clamped() {
        let bank = QuestionBank::new(["9 - A", "10 - B"]);
        let text = lines(&["9 - A", "10 - B", "OK - fine"]);
        let spans = segment(&text, &bank, &overrides(&[("9", 2)]));
        assert_eq!(spans[0].answer, 1..1);
        assert_eq!(spans[1].answer, 2..3);
    }

    #[test]
    fn test_no_questions() {
        let bank = QuestionBank::new(["1 - A"]);
        assert!(segment(&lines(&["x", "y"]), &bank, &BTreeMap::new()).is_empty());
        assert!(QuestionBank::new([""]).is_empty());
    }

    #[test]
    fn test_filter_answer_lines() {
        let mut qa = create_default_config().qa;
        qa.first_question = "1 - Facade".to_string();
        qa.digital_first_question = "201 - Google".to_string();

        let text = lines(&[
            "Cover page",
            "Zoom on results",
            "1 - Facade",
            "OK - fine",
            "42",
            "85 % RECEPTION",
            "see zoom",
            "trailing noise",
            "201 - Google",
            "KO - missing",
        ]);
        let filtered = filter_answer_lines(&text, &qa).unwrap();
        assert_eq!(
            filtered,
            lines(&["1 - Facade", "OK - fine", "201 - Google", "KO - missing"])
        );
    }

    #[test]
    fn test_filter_answer_lines_missing_anchor() {
        let qa = create_default_config().qa;
        let err = filter_answer_lines(&lines(&["nothing"]), &qa).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedTemplate(_)));
    }
}
