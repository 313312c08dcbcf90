//! Report sources: where audit PDFs are listed and fetched from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One listed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

impl ReportEntry {
    /// Case-sensitive: `REPORT.PDF` is not picked up.
    pub fn is_pdf(&self) -> bool {
        self.name.ends_with(".pdf")
    }
}

/// Async trait implemented by each document store.
#[async_trait::async_trait]
pub trait ReportSource: Send + Sync {
    fn name(&self) -> &str;
    /// Every file currently in the store, sorted by name.
    async fn list(&self) -> Result<Vec<ReportEntry>>;
    async fn fetch(&self, entry: &ReportEntry) -> Result<Vec<u8>>;
}

/// Flat directory on the local filesystem. Subdirectories are ignored.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    dir: PathBuf,
}

impl LocalDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl ReportSource for LocalDirSource {
    fn name(&self) -> &str {
        "local_dir"
    }

    async fn list(&self) -> Result<Vec<ReportEntry>> {
        let mut read_dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list input directory: {:?}", self.dir))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("Failed to stat {:?}", entry.path()))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .with_context(|| format!("No modification time for {:?}", entry.path()))?;

            entries.push(ReportEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn fetch(&self, entry: &ReportEntry) -> Result<Vec<u8>> {
        tokio::fs::read(&entry.path)
            .await
            .with_context(|| format!("Failed to read report: {:?}", entry.path))
    }
}
