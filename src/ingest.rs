//! # Upload Ingest
//!
//! Persists an uploaded byte stream under `<storage>/<delivery_key>/<name>`,
//! registers it with the result store and hands it to the scheduler.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;
use crate::store::{NewSourceFile, ResultStore, StoreError};
use crate::task::SourceFile;

/// Attempts made with a numbered suffix after the timestamped name is also taken.
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing required metadata: {0}")]
    MissingMetadata(&'static str),
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    #[error("invalid delivery key: {0:?}")]
    InvalidDeliveryKey(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Form fields accompanying an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub esp_id: String,
    pub delivery_key: String,
    /// Required to be present, never stored.
    pub encryption_password: String,
}

#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub file: SourceFile,
    pub queued_for_analysis: bool,
}

impl UploadRequest {
    fn validate(&self) -> Result<(), IngestError> {
        if self.esp_id.trim().is_empty() {
            return Err(IngestError::MissingMetadata("esp_id"));
        }
        if self.delivery_key.trim().is_empty() {
            return Err(IngestError::MissingMetadata("delivery_key"));
        }
        if self.encryption_password.is_empty() {
            return Err(IngestError::MissingMetadata("encryption_password"));
        }
        if !is_single_component(&self.delivery_key) {
            return Err(IngestError::InvalidDeliveryKey(self.delivery_key.clone()));
        }
        Ok(())
    }
}

/// Write `reader` into storage and describe the stored file.
///
/// An existing file of the same name is never overwritten: the new one gets a
/// `_YYYYmmddHHMMSS` suffix before its extension.
pub fn store_upload<R: Read>(
    storage_root: &Path,
    req: &UploadRequest,
    reader: &mut R,
) -> Result<NewSourceFile, IngestError> {
    req.validate()?;
    let file_name = sanitize_file_name(&req.file_name)?;

    let delivery_dir = storage_root.join(&req.delivery_key);
    std::fs::create_dir_all(&delivery_dir)?;

    let upload_time = Utc::now();
    let (path, mut out) = create_unique(&delivery_dir, &file_name, upload_time)?;
    let written = match io::copy(reader, &mut out).and_then(|n| out.flush().map(|_| n)) {
        Ok(n) => n,
        Err(err) => {
            drop(out);
            if let Err(cleanup) = std::fs::remove_file(&path) {
                warn!("failed to remove partial upload {}: {cleanup}", path.display());
            }
            return Err(err.into());
        }
    };
    let file_size = out.metadata().map(|m| m.len()).unwrap_or(written);
    debug!("stored upload path={} bytes={}", path.display(), file_size);

    Ok(NewSourceFile {
        file_name,
        file_path: path,
        esp_id: req.esp_id.clone(),
        delivery_key: req.delivery_key.clone(),
        file_size,
        upload_time,
    })
}

/// Store an upload, register it and submit it for analysis.
///
/// A full queue does not fail the upload; the receipt reports it instead.
pub fn ingest_upload<R: Read>(
    storage_root: &Path,
    store: &dyn ResultStore,
    scheduler: &Scheduler,
    req: &UploadRequest,
    reader: &mut R,
) -> Result<IngestReceipt, IngestError> {
    let new_file = store_upload(storage_root, req, reader)?;
    let file = store.register_file(new_file)?;
    let queued_for_analysis = scheduler.submit(&file);
    info!(
        "ingested file_id={} name={} esp_id={} delivery_key={} size={} queued={}",
        file.id, file.file_name, file.esp_id, file.delivery_key, file.file_size, queued_for_analysis
    );
    Ok(IngestReceipt {
        file,
        queued_for_analysis,
    })
}

fn sanitize_file_name(raw: &str) -> Result<String, IngestError> {
    // Clients may send a full path; only the final component is kept.
    let candidate = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." || candidate.contains('\0') {
        return Err(IngestError::InvalidFileName(raw.to_string()));
    }
    Ok(candidate.to_string())
}

fn is_single_component(value: &str) -> bool {
    !value.contains(['/', '\\', '\0']) && value != "." && value != ".."
}

fn create_unique(
    dir: &Path,
    file_name: &str,
    upload_time: DateTime<Utc>,
) -> Result<(PathBuf, File), IngestError> {
    let (stem, ext) = split_name(file_name);
    let stamp = upload_time.with_timezone(&Local).format("%Y%m%d%H%M%S").to_string();

    let candidates = std::iter::once(file_name.to_string())
        .chain(std::iter::once(format!("{stem}_{stamp}{ext}")))
        .chain((1..MAX_NAME_ATTEMPTS).map(|n| format!("{stem}_{stamp}_{n}{ext}")));

    for name in candidates {
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(IngestError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {file_name} in {}", dir.display()),
    )))
}

/// Split `report.tar.gz` into (`report.tar`, `.gz`). Dotfiles keep their name as the stem.
fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name, ""),
    }
}
