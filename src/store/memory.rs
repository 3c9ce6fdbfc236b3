use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::store::{
    AnalysisRecord, AnalysisStatus, NewSourceFile, RecordId, RecordUpdate, ResultStore,
    StoreError, parameters_snapshot,
};
use crate::task::{AnalysisTask, FileId, SourceFile};

#[derive(Default)]
struct MemoryState {
    next_file_id: FileId,
    next_record_id: RecordId,
    files: BTreeMap<FileId, SourceFile>,
    records: BTreeMap<RecordId, AnalysisRecord>,
}

/// Process-local store, used when no database path is configured.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ResultStore for MemoryStore {
    fn register_file(&self, file: NewSourceFile) -> Result<SourceFile, StoreError> {
        let mut state = self.lock()?;
        state.next_file_id += 1;
        let stored = SourceFile {
            id: state.next_file_id,
            file_name: file.file_name,
            file_path: file.file_path,
            esp_id: file.esp_id,
            delivery_key: file.delivery_key,
            file_size: file.file_size,
            upload_time: file.upload_time,
            analyzed: false,
        };
        state.files.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get_file(&self, file_id: FileId) -> Result<Option<SourceFile>, StoreError> {
        Ok(self.lock()?.files.get(&file_id).cloned())
    }

    fn list_files(&self) -> Result<Vec<SourceFile>, StoreError> {
        Ok(self.lock()?.files.values().cloned().collect())
    }

    fn mark_analyzed(&self, file_id: FileId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let file = state
            .files
            .get_mut(&file_id)
            .ok_or(StoreError::UnknownFile(file_id))?;
        file.analyzed = true;
        Ok(())
    }

    fn create_record(&self, task: &AnalysisTask) -> Result<RecordId, StoreError> {
        let parameters = parameters_snapshot(task)?;
        let mut state = self.lock()?;
        let file_id = task.file.id;
        if !state.files.contains_key(&file_id) {
            return Err(StoreError::UnknownFile(file_id));
        }
        let has_pending = state
            .records
            .values()
            .any(|r| r.file_id == file_id && r.status == AnalysisStatus::Pending);
        if has_pending {
            return Err(StoreError::AlreadyPending(file_id));
        }

        state.next_record_id += 1;
        let id = state.next_record_id;
        state.records.insert(
            id,
            AnalysisRecord {
                id,
                file_id,
                file_name: task.file.file_name.clone(),
                status: AnalysisStatus::Pending,
                parameters,
                start_time: Utc::now(),
                end_time: None,
                sections: None,
                error: None,
                failure: None,
            },
        );
        Ok(id)
    }

    fn update_record(&self, id: RecordId, update: RecordUpdate) -> Result<bool, StoreError> {
        if !update.status.is_terminal() {
            return Err(StoreError::NotTerminal(update.status));
        }
        let mut state = self.lock()?;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(StoreError::UnknownRecord(id))?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.status = update.status;
        record.end_time = Some(update.end_time);
        record.sections = update.sections;
        record.error = update.error;
        record.failure = update.failure;
        Ok(true)
    }

    fn get_record(&self, id: RecordId) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    fn latest_record_for_file(&self, file_id: FileId) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .rev()
            .find(|r| r.file_id == file_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::testutil;

    #[test]
    fn satisfies_store_contract() {
        testutil::exercise_store(&MemoryStore::new());
    }
}
