use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisParameters;

pub type FileId = i64;
pub type TaskId = u64;

/// An uploaded file as persisted by the ingest path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: FileId,
    pub file_name: String,
    pub file_path: PathBuf,
    pub esp_id: String,
    pub delivery_key: String,
    pub file_size: u64,
    pub upload_time: DateTime<Utc>,
    pub analyzed: bool,
}

/// One unit of scheduled analysis work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub file: SourceFile,
    pub submitted_at: DateTime<Utc>,
    pub params: Arc<AnalysisParameters>,
}
