//! # Analysis Pipeline
//!
//! Builds the structured analysis of one uploaded file: basic attributes,
//! submitter details, best-effort metadata and the content-pattern scan.
//! The pipeline only computes; persisting the result is the caller's job.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AnalysisParameters;
use crate::extractor::{MetadataExtractor, MetadataSection};
use crate::patterns::{self, PatternScan};
use crate::task::SourceFile;
use crate::util;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("analysis cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag shared between a worker and the pipeline it started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeInfo {
    pub bytes: u64,
    pub human_readable: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub name: String,
    /// Upload time, RFC 3339.
    pub collection_date: String,
    /// Lowercased extension including the dot, empty when absent.
    pub file_type: String,
    pub size: SizeInfo,
}

impl BasicInfo {
    pub fn from_file(file: &SourceFile) -> Self {
        Self {
            name: file.file_name.clone(),
            collection_date: file.upload_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            file_type: util::file_extension(&file.file_name),
            size: SizeInfo {
                bytes: file.file_size,
                human_readable: util::human_readable_size(file.file_size),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EspInfo {
    pub esp_id: String,
    pub delivery_key: String,
    /// Uploads are encrypted at rest by the delivery path.
    pub is_encrypted: bool,
}

impl EspInfo {
    pub fn from_file(file: &SourceFile) -> Self {
        Self {
            esp_id: file.esp_id.clone(),
            delivery_key: file.delivery_key.clone(),
            is_encrypted: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub patterns_found: bool,
    pub matches: BTreeMap<String, Vec<String>>,
}

impl From<PatternScan> for ContentAnalysis {
    fn from(scan: PatternScan) -> Self {
        Self {
            patterns_found: scan.any_found,
            matches: scan.matches,
        }
    }
}

/// Every section produced for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSections {
    pub basic_info: BasicInfo,
    pub esp_info: EspInfo,
    pub metadata: MetadataSection,
    pub content_analysis: ContentAnalysis,
    /// Completion time of the scan, UTC RFC 3339.
    pub scan_timestamp: String,
}

pub struct AnalysisPipeline {
    extractor: Arc<dyn MetadataExtractor>,
}

impl AnalysisPipeline {
    pub fn new(extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self { extractor }
    }

    /// Analyse `file` with `params`.
    ///
    /// Metadata extraction never fails the analysis. Reading the file content is
    /// the only hard failure. `cancel` is checked between steps.
    pub fn analyze(
        &self,
        file: &SourceFile,
        params: &AnalysisParameters,
        cancel: &CancelToken,
    ) -> Result<AnalysisSections, AnalysisError> {
        let basic_info = BasicInfo::from_file(file);
        let esp_info = EspInfo::from_file(file);

        cancel.check()?;
        let metadata = if params.metadata_extraction {
            self.extractor.extract(&file.file_path)
        } else {
            MetadataSection::default()
        };

        cancel.check()?;
        let content = std::fs::read(&file.file_path).map_err(|source| AnalysisError::ReadFile {
            path: file.file_path.clone(),
            source,
        })?;

        cancel.check()?;
        let scan = patterns::scan(&content, &params.content_patterns);
        debug!(
            "scanned file_id={} bytes={} patterns_found={}",
            file.id,
            content.len(),
            scan.any_found
        );

        Ok(AnalysisSections {
            basic_info,
            esp_info,
            metadata,
            content_analysis: scan.into(),
            scan_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}
