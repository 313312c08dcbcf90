//! The three aggregate tables and the incremental-run bookkeeping around them.
//!
//! Each run diffs the source listing against `file_timeline`, drops rows of
//! deleted and replaced files, and appends the rows of freshly extracted ones.

use crate::error::ExtractResult;
use crate::schema::{QaRow, ReportExtraction, StatisticRow, TimelineEntry};
use crate::source::ReportEntry;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

pub const STATISTICS_FILE: &str = "statistics.csv";
pub const QA_RESULTS_FILE: &str = "qa_results.csv";
pub const TIMELINE_FILE: &str = "file_timeline.csv";

const STATISTICS_HEADER: [&str; 3] = ["statistic", "value", "filename"];
const QA_RESULTS_HEADER: [&str; 7] = [
    "question_number",
    "question",
    "answer",
    "status",
    "pre_comment",
    "post_comment",
    "filename",
];
const TIMELINE_HEADER: [&str; 2] = ["filename", "last_modified"];

/// Outcome of diffing one listed file against the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    New,
    Replaced,
    Unchanged,
    Deleted,
    /// Not a PDF. Never processed and never recorded.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub entry: ReportEntry,
    pub status: FileStatus,
}

/// Per-file decisions for one run.
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    /// Listed files, in listing order.
    pub entries: Vec<PlannedEntry>,
    /// Timeline names no longer present in the listing.
    pub deleted: Vec<String>,
}

impl ScanPlan {
    /// New and replaced entries, in listing order.
    pub fn to_process(&self) -> impl Iterator<Item = &PlannedEntry> {
        self.entries
            .iter()
            .filter(|p| matches!(p.status, FileStatus::New | FileStatus::Replaced))
    }

    pub fn count(&self, status: FileStatus) -> usize {
        if status == FileStatus::Deleted {
            return self.deleted.len();
        }
        self.entries.iter().filter(|p| p.status == status).count()
    }
}

/// In-memory copy of the persisted tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOutput {
    pub statistics: Vec<StatisticRow>,
    pub qa_results: Vec<QaRow>,
    pub file_timeline: Vec<TimelineEntry>,
}

impl AggregateOutput {
    /// Diff a source listing against the timeline.
    pub fn plan(&self, listing: &[ReportEntry]) -> ScanPlan {
        let known: HashMap<&str, DateTime<Utc>> = self
            .file_timeline
            .iter()
            .map(|t| (t.filename.as_str(), t.last_modified))
            .collect();

        let entries = listing
            .iter()
            .map(|entry| {
                let status = if !entry.is_pdf() {
                    FileStatus::Ignored
                } else {
                    match known.get(entry.name.as_str()) {
                        None => FileStatus::New,
                        Some(last) if entry.modified > *last => FileStatus::Replaced,
                        Some(_) => FileStatus::Unchanged,
                    }
                };
                PlannedEntry {
                    entry: entry.clone(),
                    status,
                }
            })
            .collect();

        let listed: HashSet<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        let deleted = self
            .file_timeline
            .iter()
            .filter(|t| !listed.contains(t.filename.as_str()))
            .map(|t| t.filename.clone())
            .collect();

        ScanPlan { entries, deleted }
    }

    /// Drop statistics and QA rows of the given files, and optionally their
    /// timeline entries.
    pub fn delete_records(&mut self, names: &[String], include_timeline: bool) {
        if names.is_empty() {
            return;
        }
        let names: HashSet<&str> = names.iter().map(String::as_str).collect();
        let before = self.statistics.len() + self.qa_results.len();

        self.statistics.retain(|r| !names.contains(r.filename.as_str()));
        self.qa_results.retain(|r| !names.contains(r.filename.as_str()));
        if include_timeline {
            self.file_timeline
                .retain(|t| !names.contains(t.filename.as_str()));
        }

        debug!(
            "Deleted {} rows for {} files",
            before - self.statistics.len() - self.qa_results.len(),
            names.len()
        );
    }

    /// Insert or update the timeline entry of a file.
    pub fn record_modified(&mut self, name: &str, modified: DateTime<Utc>) {
        match self.file_timeline.iter_mut().find(|t| t.filename == name) {
            Some(entry) => entry.last_modified = modified,
            None => self.file_timeline.push(TimelineEntry {
                filename: name.to_string(),
                last_modified: modified,
            }),
        }
    }

    pub fn append(&mut self, extraction: ReportExtraction) {
        self.statistics.extend(extraction.statistics);
        self.qa_results.extend(extraction.qa_results);
    }

    /// Value of one statistic for one file, if present.
    pub fn statistic(&self, filename: &str, statistic: &str) -> Option<&str> {
        self.statistics
            .iter()
            .find(|r| r.filename == filename && r.statistic == statistic)
            .map(|r| r.value.as_str())
    }

    /// Load the tables from `dir`. Missing files load as empty tables.
    pub fn load(dir: &Path) -> ExtractResult<Self> {
        let output = Self {
            statistics: read_table(&dir.join(STATISTICS_FILE))?,
            qa_results: read_table(&dir.join(QA_RESULTS_FILE))?,
            file_timeline: read_table(&dir.join(TIMELINE_FILE))?,
        };
        info!(
            "Loaded aggregate from {:?}: {} statistics, {} QA rows, {} files",
            dir,
            output.statistics.len(),
            output.qa_results.len(),
            output.file_timeline.len()
        );
        Ok(output)
    }

    /// Rewrite all three tables under `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> ExtractResult<()> {
        std::fs::create_dir_all(dir)?;
        write_table(&dir.join(STATISTICS_FILE), &STATISTICS_HEADER, &self.statistics)?;
        write_table(&dir.join(QA_RESULTS_FILE), &QA_RESULTS_HEADER, &self.qa_results)?;
        write_table(&dir.join(TIMELINE_FILE), &TIMELINE_HEADER, &self.file_timeline)?;
        info!(
            "Wrote aggregate to {:?}: {} statistics, {} QA rows, {} files",
            dir,
            self.statistics.len(),
            self.qa_results.len(),
            self.file_timeline.len()
        );
        Ok(())
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> ExtractResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> ExtractResult<()> {
    // Header written by hand so empty tables still carry one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Status;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn entry(name: &str, secs: i64) -> ReportEntry {
        ReportEntry {
            name: name.to_string(),
            path: PathBuf::from(name),
            modified: at(secs),
        }
    }

    fn extraction(filename: &str) -> ReportExtraction {
        ReportExtraction {
            filename: filename.to_string(),
            statistics: vec![StatisticRow {
                statistic: "name1".to_string(),
                value: format!("Dealer of {}", filename),
                filename: filename.to_string(),
            }],
            qa_results: vec![QaRow {
                question_number: "1".to_string(),
                question: "Facade".to_string(),
                answer: "line one\nOK - line, two".to_string(),
                status: Status::Ok,
                pre_comment: "line one\n".to_string(),
                post_comment: "line, two".to_string(),
                filename: filename.to_string(),
            }],
        }
    }

    fn seeded() -> AggregateOutput {
        let mut output = AggregateOutput::default();
        for (name, secs) in [("a.pdf", 100), ("b.pdf", 100), ("c.pdf", 100)] {
            output.append(extraction(name));
            output.record_modified(name, at(secs));
        }
        output
    }

    #[test]
    fn test_plan_statuses() {
        let output = seeded();
        let listing = vec![
            entry("a.pdf", 100),
            entry("b.pdf", 200),
            entry("d.pdf", 50),
            entry("notes.docx", 10),
            entry("SCAN.PDF", 10),
        ];
        let plan = output.plan(&listing);

        let statuses: Vec<FileStatus> = plan.entries.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                FileStatus::Unchanged,
                FileStatus::Replaced,
                FileStatus::New,
                FileStatus::Ignored,
                FileStatus::Ignored
            ]
        );
        assert_eq!(plan.deleted, vec!["c.pdf".to_string()]);
        assert_eq!(plan.count(FileStatus::Deleted), 1);

        let process: Vec<&str> = plan.to_process().map(|p| p.entry.name.as_str()).collect();
        assert_eq!(process, vec!["b.pdf", "d.pdf"]);
    }

    #[test]
    fn test_older_timestamp_is_unchanged() {
        let output = seeded();
        let plan = output.plan(&[entry("a.pdf", 50)]);
        assert_eq!(plan.entries[0].status, FileStatus::Unchanged);
    }

    #[test]
    fn test_delete_records() {
        let mut output = seeded();
        output.delete_records(&["b.pdf".to_string()], false);
        assert!(output.statistics.iter().all(|r| r.filename != "b.pdf"));
        assert!(output.qa_results.iter().all(|r| r.filename != "b.pdf"));
        assert_eq!(output.file_timeline.len(), 3);

        output.delete_records(&["c.pdf".to_string()], true);
        assert_eq!(output.file_timeline.len(), 2);
        assert_eq!(output.statistics.len(), 1);
    }

    #[test]
    fn test_record_modified_updates_in_place() {
        let mut output = seeded();
        output.record_modified("b.pdf", at(300));
        assert_eq!(output.file_timeline.len(), 3);
        assert_eq!(output.file_timeline[1].last_modified, at(300));
    }

    #[test]
    fn test_replan_after_recording_is_idempotent() {
        let mut output = seeded();
        let listing = vec![entry("a.pdf", 100), entry("b.pdf", 200)];
        let plan = output.plan(&listing);
        output.delete_records(&plan.deleted, true);
        for planned in plan.to_process() {
            output.record_modified(&planned.entry.name, planned.entry.modified);
        }

        let again = output.plan(&listing);
        assert_eq!(again.to_process().count(), 0);
        assert!(again.deleted.is_empty());
    }

    #[test]
    fn test_statistic_lookup() {
        let output = seeded();
        assert_eq!(output.statistic("a.pdf", "name1"), Some("Dealer of a.pdf"));
        assert_eq!(output.statistic("a.pdf", "dealer_code"), None);
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let output = AggregateOutput::load(&dir.path().join("nothing")).unwrap();
        assert_eq!(output, AggregateOutput::default());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("output");
        let mut output = seeded();
        output.qa_results[0].status = Status::Unscored;
        output.write(&out_dir).unwrap();

        let loaded = AggregateOutput::load(&out_dir).unwrap();
        assert_eq!(loaded, output);
    }

    #[test]
    fn test_empty_tables_keep_headers() {
        let dir = tempfile::tempdir().unwrap();
        AggregateOutput::default().write(dir.path()).unwrap();
        let text = std::fs::read_to_string(dir.path().join(TIMELINE_FILE)).unwrap();
        assert_eq!(text.trim(), "filename,last_modified");
        assert_eq!(
            AggregateOutput::load(dir.path()).unwrap(),
            AggregateOutput::default()
        );
    }
}
