//! # Result Store
//!
//! Durable per-file analysis records. Terminal updates are compare-and-set on
//! the `pending` status: the first terminal write commits, later ones are no-ops.

pub mod memory;
pub mod sqlite;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{AnalysisSections, BasicInfo, ContentAnalysis, EspInfo};
use crate::extractor::MetadataSection;
use crate::task::{AnalysisTask, FileId, SourceFile};

pub type RecordId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AnalysisStatus::Pending),
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AnalysisStatus::Pending)
    }
}

/// Why a failed record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The worker deadline fired before the pipeline finished.
    Timeout,
    /// The pipeline itself returned an error.
    Pipeline,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Pipeline => "pipeline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "timeout" => Some(FailureKind::Timeout),
            "pipeline" => Some(FailureKind::Pipeline),
            _ => None,
        }
    }
}

/// A file accepted by the ingest path, before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSourceFile {
    pub file_name: String,
    pub file_path: PathBuf,
    pub esp_id: String,
    pub delivery_key: String,
    pub file_size: u64,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: RecordId,
    pub file_id: FileId,
    pub file_name: String,
    pub status: AnalysisStatus,
    /// JSON snapshot of the parameters the analysis ran with.
    pub parameters: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub sections: Option<AnalysisSections>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

/// The one terminal update applied to a pending record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub status: AnalysisStatus,
    pub end_time: DateTime<Utc>,
    pub sections: Option<AnalysisSections>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

impl RecordUpdate {
    pub fn completed(sections: AnalysisSections) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            end_time: Utc::now(),
            sections: Some(sections),
            error: None,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            end_time: Utc::now(),
            sections: None,
            error: Some(error.into()),
            failure: Some(kind),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("unknown file id {0}")]
    UnknownFile(FileId),
    #[error("unknown record id {0}")]
    UnknownRecord(RecordId),
    #[error("file {0} already has a pending analysis")]
    AlreadyPending(FileId),
    #[error("record update must be terminal, got {0:?}")]
    NotTerminal(AnalysisStatus),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

pub trait ResultStore: Send + Sync {
    fn register_file(&self, file: NewSourceFile) -> Result<SourceFile, StoreError>;
    fn get_file(&self, file_id: FileId) -> Result<Option<SourceFile>, StoreError>;
    fn list_files(&self) -> Result<Vec<SourceFile>, StoreError>;
    /// Flip the file's analyzed flag. Idempotent.
    fn mark_analyzed(&self, file_id: FileId) -> Result<(), StoreError>;

    /// Create the pending record for `task`. Fails if the file already has one.
    fn create_record(&self, task: &AnalysisTask) -> Result<RecordId, StoreError>;
    /// Apply a terminal update if the record is still pending.
    ///
    /// Returns `Ok(false)` when another terminal write already committed.
    fn update_record(&self, id: RecordId, update: RecordUpdate) -> Result<bool, StoreError>;
    fn get_record(&self, id: RecordId) -> Result<Option<AnalysisRecord>, StoreError>;
    /// Most recently created record for a file.
    fn latest_record_for_file(&self, file_id: FileId) -> Result<Option<AnalysisRecord>, StoreError>;
}

/// Open a SQLite store at `db_path`, or an in-memory store when no path is given.
pub fn build_store(db_path: Option<&Path>) -> Result<Box<dyn ResultStore>, StoreError> {
    match db_path {
        Some(path) => Ok(Box::new(sqlite::SqliteStore::open(path)?)),
        None => Ok(Box::new(memory::MemoryStore::new())),
    }
}

pub(crate) fn parameters_snapshot(task: &AnalysisTask) -> Result<String, StoreError> {
    Ok(serde_json::to_string(task.params.as_ref())?)
}

/// JSON view of a record, as served to clients.
#[derive(Debug, Serialize)]
pub struct ResultReport<'a> {
    pub file_id: FileId,
    pub filename: &'a str,
    pub status: AnalysisStatus,
    pub parameters: serde_json::Value,
    pub basic_info: Option<&'a BasicInfo>,
    pub esp_info: Option<&'a EspInfo>,
    pub metadata: Option<&'a MetadataSection>,
    pub content_analysis: Option<&'a ContentAnalysis>,
    pub scan_timestamp: Option<&'a str>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<&'a str>,
    pub failure: Option<FailureKind>,
}

impl<'a> From<&'a AnalysisRecord> for ResultReport<'a> {
    fn from(record: &'a AnalysisRecord) -> Self {
        let sections = record.sections.as_ref();
        Self {
            file_id: record.file_id,
            filename: &record.file_name,
            status: record.status,
            parameters: serde_json::from_str(&record.parameters)
                .unwrap_or(serde_json::Value::Null),
            basic_info: sections.map(|s| &s.basic_info),
            esp_info: sections.map(|s| &s.esp_info),
            metadata: sections.map(|s| &s.metadata),
            content_analysis: sections.map(|s| &s.content_analysis),
            scan_timestamp: sections.map(|s| s.scan_timestamp.as_str()),
            start_time: record.start_time,
            end_time: record.end_time,
            error: record.error.as_deref(),
            failure: record.failure,
        }
    }
}
