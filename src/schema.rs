//! Row types for the three aggregate tables.
//!
//! Field names match the persisted CSV headers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One extracted statistic for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticRow {
    pub statistic: String,
    /// Left untyped; downstream consumers parse numbers out of it.
    pub value: String,
    pub filename: String,
}

/// Qualitative classification of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "KO")]
    Ko,
    #[serde(rename = "PA")]
    Pa,
    #[serde(rename = "NE")]
    Ne,
    #[serde(rename = "NA")]
    Na,
    #[default]
    #[serde(rename = "")]
    Unscored,
}

impl Status {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Ko => "KO",
            Self::Pa => "PA",
            Self::Ne => "NE",
            Self::Na => "NA",
            Self::Unscored => "",
        }
    }

    pub fn is_scored(&self) -> bool {
        !matches!(self, Self::Unscored)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A canonical question detected in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Free-form label such as "41b".
    pub number: String,
    pub text: String,
}

/// One question with its classified answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaRow {
    pub question_number: String,
    pub question: String,
    pub answer: String,
    pub status: Status,
    pub pre_comment: String,
    pub post_comment: String,
    pub filename: String,
}

/// Last seen modification time of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub filename: String,
    pub last_modified: DateTime<Utc>,
}

/// Everything one report contributes to the aggregate.
#[derive(Debug, Clone, Default)]
pub struct ReportExtraction {
    pub filename: String,
    pub statistics: Vec<StatisticRow>,
    pub qa_results: Vec<QaRow>,
}
