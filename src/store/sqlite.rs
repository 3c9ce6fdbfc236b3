use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::analysis::AnalysisSections;
use crate::store::{
    AnalysisRecord, AnalysisStatus, FailureKind, NewSourceFile, RecordId, RecordUpdate,
    ResultStore, StoreError, parameters_snapshot,
};
use crate::task::{AnalysisTask, FileId, SourceFile};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS source_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    esp_id TEXT NOT NULL,
    delivery_key TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    upload_time TEXT NOT NULL,
    analyzed INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES source_files(id),
    file_name TEXT NOT NULL,
    status TEXT NOT NULL,
    parameters TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    basic_info TEXT,
    esp_info TEXT,
    metadata TEXT,
    content_analysis TEXT,
    scan_timestamp TEXT,
    error TEXT,
    failure TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS analysis_results_one_pending
    ON analysis_results(file_id) WHERE status = 'pending';
";

const FILE_COLUMNS: &str =
    "id, file_name, file_path, esp_id, delivery_key, file_size, upload_time, analyzed";

const RECORD_COLUMNS: &str = "id, file_id, file_name, status, parameters, start_time, end_time, \
     basic_info, esp_info, metadata, content_analysis, scan_timestamp, error, failure";

/// SQLite-backed store. One connection guarded by a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ResultStore for SqliteStore {
    fn register_file(&self, file: NewSourceFile) -> Result<SourceFile, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO source_files (file_name, file_path, esp_id, delivery_key, file_size, upload_time, analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                file.file_name,
                file.file_path.to_string_lossy().into_owned(),
                file.esp_id,
                file.delivery_key,
                i64::try_from(file.file_size).unwrap_or(i64::MAX),
                format_time(&file.upload_time),
            ],
        )?;
        Ok(SourceFile {
            id: conn.last_insert_rowid(),
            file_name: file.file_name,
            file_path: file.file_path,
            esp_id: file.esp_id,
            delivery_key: file.delivery_key,
            file_size: file.file_size,
            upload_time: file.upload_time,
            analyzed: false,
        })
    }

    fn get_file(&self, file_id: FileId) -> Result<Option<SourceFile>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM source_files WHERE id = ?1"),
                [file_id],
                FileRow::from_row,
            )
            .optional()?;
        row.map(FileRow::into_file).transpose()
    }

    fn list_files(&self) -> Result<Vec<SourceFile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM source_files ORDER BY id"
        ))?;
        let rows = stmt.query_map([], FileRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_file()?);
        }
        Ok(out)
    }

    fn mark_analyzed(&self, file_id: FileId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE source_files SET analyzed = 1 WHERE id = ?1",
            [file_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownFile(file_id));
        }
        Ok(())
    }

    fn create_record(&self, task: &AnalysisTask) -> Result<RecordId, StoreError> {
        let parameters = parameters_snapshot(task)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let file_id = task.file.id;

        let known: Option<i64> = tx
            .query_row("SELECT id FROM source_files WHERE id = ?1", [file_id], |row| {
                row.get(0)
            })
            .optional()?;
        if known.is_none() {
            return Err(StoreError::UnknownFile(file_id));
        }
        let pending: Option<i64> = tx
            .query_row(
                "SELECT id FROM analysis_results WHERE file_id = ?1 AND status = 'pending'",
                [file_id],
                |row| row.get(0),
            )
            .optional()?;
        if pending.is_some() {
            return Err(StoreError::AlreadyPending(file_id));
        }

        tx.execute(
            "INSERT INTO analysis_results (file_id, file_name, status, parameters, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file_id,
                task.file.file_name,
                AnalysisStatus::Pending.as_str(),
                parameters,
                format_time(&Utc::now()),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn update_record(&self, id: RecordId, update: RecordUpdate) -> Result<bool, StoreError> {
        if !update.status.is_terminal() {
            return Err(StoreError::NotTerminal(update.status));
        }
        let sections = update.sections.as_ref();
        let basic_info = sections.map(|s| to_json(&s.basic_info)).transpose()?;
        let esp_info = sections.map(|s| to_json(&s.esp_info)).transpose()?;
        let metadata = sections.map(|s| to_json(&s.metadata)).transpose()?;
        let content_analysis = sections.map(|s| to_json(&s.content_analysis)).transpose()?;
        let scan_timestamp = sections.map(|s| s.scan_timestamp.clone());

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE analysis_results
             SET status = ?1, end_time = ?2, basic_info = ?3, esp_info = ?4, metadata = ?5,
                 content_analysis = ?6, scan_timestamp = ?7, error = ?8, failure = ?9
             WHERE id = ?10 AND status = 'pending'",
            params![
                update.status.as_str(),
                format_time(&update.end_time),
                basic_info,
                esp_info,
                metadata,
                content_analysis,
                scan_timestamp,
                update.error,
                update.failure.map(FailureKind::as_str),
                id,
            ],
        )?;
        if changed == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row("SELECT id FROM analysis_results WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::UnknownRecord(id)),
        }
    }

    fn get_record(&self, id: RecordId) -> Result<Option<AnalysisRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM analysis_results WHERE id = ?1"),
                [id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn latest_record_for_file(&self, file_id: FileId) -> Result<Option<AnalysisRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM analysis_results WHERE file_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                [file_id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }
}

struct FileRow {
    id: i64,
    file_name: String,
    file_path: String,
    esp_id: String,
    delivery_key: String,
    file_size: i64,
    upload_time: String,
    analyzed: bool,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_name: row.get(1)?,
            file_path: row.get(2)?,
            esp_id: row.get(3)?,
            delivery_key: row.get(4)?,
            file_size: row.get(5)?,
            upload_time: row.get(6)?,
            analyzed: row.get(7)?,
        })
    }

    fn into_file(self) -> Result<SourceFile, StoreError> {
        Ok(SourceFile {
            id: self.id,
            file_name: self.file_name,
            file_path: PathBuf::from(self.file_path),
            esp_id: self.esp_id,
            delivery_key: self.delivery_key,
            file_size: u64::try_from(self.file_size).unwrap_or(0),
            upload_time: parse_time(&self.upload_time)?,
            analyzed: self.analyzed,
        })
    }
}

struct RecordRow {
    id: i64,
    file_id: i64,
    file_name: String,
    status: String,
    parameters: String,
    start_time: String,
    end_time: Option<String>,
    basic_info: Option<String>,
    esp_info: Option<String>,
    metadata: Option<String>,
    content_analysis: Option<String>,
    scan_timestamp: Option<String>,
    error: Option<String>,
    failure: Option<String>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_id: row.get(1)?,
            file_name: row.get(2)?,
            status: row.get(3)?,
            parameters: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            basic_info: row.get(7)?,
            esp_info: row.get(8)?,
            metadata: row.get(9)?,
            content_analysis: row.get(10)?,
            scan_timestamp: row.get(11)?,
            error: row.get(12)?,
            failure: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<AnalysisRecord, StoreError> {
        let status = AnalysisStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {:?}", self.status)))?;
        let failure = self
            .failure
            .as_deref()
            .map(|value| {
                FailureKind::parse(value)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown failure kind {value:?}")))
            })
            .transpose()?;

        let sections = match (
            self.basic_info,
            self.esp_info,
            self.metadata,
            self.content_analysis,
            self.scan_timestamp,
        ) {
            (Some(basic), Some(esp), Some(meta), Some(content), Some(scan_timestamp)) => {
                Some(AnalysisSections {
                    basic_info: from_json(&basic)?,
                    esp_info: from_json(&esp)?,
                    metadata: from_json(&meta)?,
                    content_analysis: from_json(&content)?,
                    scan_timestamp,
                })
            }
            _ => None,
        };

        Ok(AnalysisRecord {
            id: self.id,
            file_id: self.file_id,
            file_name: self.file_name,
            status,
            parameters: self.parameters,
            start_time: parse_time(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            sections,
            error: self.error,
            failure,
        })
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(value: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(value)?)
}
