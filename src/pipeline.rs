//! Batch extraction pipeline: diff the source, extract new and replaced
//! reports on a bounded worker pool, merge into the aggregate.

use crate::aggregate::{AggregateOutput, FileStatus};
use crate::config::TemplateConfig;
use crate::error::ExtractResult;
use crate::locator::locate;
use crate::pdf::TextProvider;
use crate::schema::ReportExtraction;
use crate::segmenter::{detect_quality_assessment, filter_answer_lines, QuestionBank};
use crate::source::{ReportEntry, ReportSource};
use crate::stats::extract_statistics;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Reports extracted concurrently.
    pub max_workers: usize,
    /// Per-report wall clock limit. The blocking thread of a timed-out
    /// report is abandoned, not interrupted, and keeps its worker slot
    /// until it returns.
    pub report_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            report_timeout: Duration::from_secs(120),
        }
    }
}

/// File counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub new: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub ignored: usize,
    /// New or replaced reports that produced no rows.
    pub failed: usize,
}

/// Extraction pipeline orchestrator for one template.
pub struct Pipeline {
    template: Arc<TemplateConfig>,
    bank: Arc<QuestionBank>,
    provider: Arc<dyn TextProvider>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        template: TemplateConfig,
        questions: Vec<String>,
        provider: Arc<dyn TextProvider>,
    ) -> Self {
        let bank = QuestionBank::new(questions);
        if bank.is_empty() {
            warn!("Question bank is empty, no QA rows will be produced");
        } else {
            debug!("Question bank holds {} questions", bank.len());
        }

        Self {
            template: Arc::new(template),
            bank: Arc::new(bank),
            provider,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn template(&self) -> &TemplateConfig {
        &self.template
    }

    /// Bring `aggregate` in line with the current contents of `source`.
    pub async fn run(
        &self,
        source: &dyn ReportSource,
        aggregate: &mut AggregateOutput,
    ) -> Result<RunSummary> {
        let listing = source
            .list()
            .await
            .with_context(|| format!("Failed to list source '{}'", source.name()))?;
        let plan = aggregate.plan(&listing);

        let mut summary = RunSummary {
            new: plan.count(FileStatus::New),
            replaced: plan.count(FileStatus::Replaced),
            unchanged: plan.count(FileStatus::Unchanged),
            deleted: plan.count(FileStatus::Deleted),
            ignored: plan.count(FileStatus::Ignored),
            failed: 0,
        };
        info!(
            "Source '{}' with template '{}': {} new, {} replaced, {} unchanged, {} deleted, {} ignored",
            source.name(),
            self.template.name,
            summary.new,
            summary.replaced,
            summary.unchanged,
            summary.deleted,
            summary.ignored
        );

        aggregate.delete_records(&plan.deleted, true);

        let replaced: Vec<String> = plan
            .entries
            .iter()
            .filter(|p| p.status == FileStatus::Replaced)
            .map(|p| p.entry.name.clone())
            .collect();
        aggregate.delete_records(&replaced, false);

        let pending: Vec<ReportEntry> = plan.to_process().map(|p| p.entry.clone()).collect();
        for entry in &pending {
            aggregate.record_modified(&entry.name, entry.modified);
        }

        let results = self.extract_all(source, pending).await?;

        // Single writer, listing order.
        for (name, result) in results {
            match result {
                Ok(extraction) => {
                    debug!(
                        "{}: {} statistics, {} QA rows",
                        name,
                        extraction.statistics.len(),
                        extraction.qa_results.len()
                    );
                    aggregate.append(extraction);
                }
                Err(e) => {
                    error!("Skipping report {}: {:#}", name, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Run complete: {} reports extracted, {} failed",
            (summary.new + summary.replaced).saturating_sub(summary.failed),
            summary.failed
        );
        Ok(summary)
    }

    /// Fetch and extract every pending entry. Results come back in input order.
    async fn extract_all(
        &self,
        source: &dyn ReportSource,
        pending: Vec<ReportEntry>,
    ) -> Result<Vec<(String, Result<ReportExtraction>)>> {
        let mut slots: Vec<Option<Result<ReportExtraction>>> = Vec::new();
        slots.resize_with(pending.len(), || None);
        let names: Vec<String> = pending.iter().map(|e| e.name.clone()).collect();

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, entry) in pending.into_iter().enumerate() {
            let data = match source.fetch(&entry).await {
                Ok(data) => data,
                Err(e) => {
                    slots[idx] = Some(Err(e));
                    continue;
                }
            };

            let permit = semaphore.clone().acquire_owned().await?;
            let provider = self.provider.clone();
            let template = self.template.clone();
            let bank = self.bank.clone();
            let timeout = self.options.report_timeout;

            tasks.spawn(async move {
                let filename = entry.name;
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    extract_report(&data, provider.as_ref(), &template, &bank, &filename)
                });
                let result = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(extracted)) => extracted.map_err(anyhow::Error::from),
                    Ok(Err(join)) => Err(anyhow!("extraction worker failed: {}", join)),
                    Err(_) => Err(anyhow!("timed out after {:?}", timeout)),
                };
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!("Extraction task aborted: {}", e),
            }
        }

        Ok(names
            .into_iter()
            .zip(slots)
            .map(|(name, slot)| {
                let result = slot.unwrap_or_else(|| Err(anyhow!("extraction task aborted")));
                (name, result)
            })
            .collect())
    }
}

/// Extract one report: locate, then statistics and QA.
///
/// A missing QA region keeps the statistics and yields no QA rows.
pub fn extract_report(
    data: &[u8],
    provider: &dyn TextProvider,
    template: &TemplateConfig,
    bank: &QuestionBank,
    filename: &str,
) -> ExtractResult<ReportExtraction> {
    let doc = provider.pages(filename, data)?;
    let located = locate(&doc, &template.layout)?;

    let statistics = extract_statistics(&located, &template.statistics, filename);

    let qa_results = match filter_answer_lines(&located.lines, &template.qa) {
        Ok(lines) => detect_quality_assessment(
            &lines,
            bank,
            &template.qa.multi_line_questions,
            filename,
        ),
        Err(e) => {
            warn!("{}: no QA rows: {}", filename, e);
            Vec::new()
        }
    };

    Ok(ReportExtraction {
        filename: filename.to_string(),
        statistics,
        qa_results,
    })
}
