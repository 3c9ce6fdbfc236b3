//! # Metadata Extractor
//!
//! Best-effort metadata extraction through an external tool that prints JSON
//! (exiftool by default). Failures never propagate: they degrade into a
//! one-entry `{"Error": ...}` section.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::AnalysisParameters;

/// Key used for the fallback entry when extraction fails.
pub const ERROR_KEY: &str = "Error";

/// Structured key-value metadata for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataSection(pub Map<String, Value>);

impl MetadataSection {
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(ERROR_KEY.to_string(), Value::String(message.into()));
        Self(map)
    }

    /// The fallback error message, when this section is a degraded result.
    pub fn error_message(&self) -> Option<&str> {
        self.0.get(ERROR_KEY).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> MetadataSection;
}

/// Runs `<program> -json <path>` and keeps the first record of its output.
pub struct ExifToolExtractor {
    program: String,
}

impl ExifToolExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MetadataExtractor for ExifToolExtractor {
    fn extract(&self, path: &Path) -> MetadataSection {
        let output = match Command::new(&self.program).arg("-json").arg(path).output() {
            Ok(output) => output,
            Err(err) => {
                warn!("{} failed for {}: {err}", self.program, path.display());
                return MetadataSection::error(format!("Failed to extract metadata: {err}"));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                path.display(),
                stderr.trim()
            );
            return MetadataSection::error(format!(
                "Failed to extract metadata: {} exited with {}",
                self.program, output.status
            ));
        }

        match parse_tool_output(&output.stdout) {
            Ok(section) => {
                debug!("extracted {} metadata fields from {}", section.0.len(), path.display());
                section
            }
            Err(reason) => {
                warn!("unusable {} output for {}: {reason}", self.program, path.display());
                MetadataSection::error(format!("Failed to parse metadata output: {reason}"))
            }
        }
    }
}

/// Build the extractor named by `metadata_tool`.
///
/// Whether it is invoked at all is decided per analysis by `metadata_extraction`.
pub fn build_extractor(params: &AnalysisParameters) -> Box<dyn MetadataExtractor> {
    Box::new(ExifToolExtractor::new(params.metadata_tool.clone()))
}

/// Parse tool stdout into the first structured record.
///
/// Accepts either a JSON array of objects (exiftool's shape) or a single object.
/// An empty array yields an empty section.
pub fn parse_tool_output(stdout: &[u8]) -> Result<MetadataSection, String> {
    let value: Value = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;
    match value {
        Value::Array(records) => match records.into_iter().next() {
            None => Ok(MetadataSection::default()),
            Some(Value::Object(map)) => Ok(MetadataSection(map)),
            Some(other) => Err(format!("expected an object record, got {}", kind_of(&other))),
        },
        Value::Object(map) => Ok(MetadataSection(map)),
        other => Err(format!("expected an array of records, got {}", kind_of(&other))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
