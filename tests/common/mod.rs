//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde_json::{Map, Value};

use depotscan::config::{self, AnalysisParameters};
use depotscan::extractor::{MetadataExtractor, MetadataSection};
use depotscan::scheduler::{Scheduler, SchedulerConfig};
use depotscan::store::{AnalysisRecord, AnalysisStatus, NewSourceFile, ResultStore};
use depotscan::task::{FileId, SourceFile};

/// Returns the same metadata for every file and counts calls.
pub struct StaticExtractor {
    pub section: MetadataSection,
    pub calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new() -> Arc<Self> {
        let mut map = Map::new();
        map.insert("FileType".to_string(), Value::String("TXT".to_string()));
        Arc::new(Self {
            section: MetadataSection(map),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            section: MetadataSection::error("Failed to extract metadata: tool not found"),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataExtractor for StaticExtractor {
    fn extract(&self, _path: &Path) -> MetadataSection {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.section.clone()
    }
}

/// Sleeps before answering, to drive the worker deadline.
pub struct SlowExtractor {
    pub delay: Duration,
}

impl MetadataExtractor for SlowExtractor {
    fn extract(&self, _path: &Path) -> MetadataSection {
        thread::sleep(self.delay);
        MetadataSection::default()
    }
}

/// Blocks every extraction until the paired sender is dropped.
pub struct GatedExtractor {
    gate: Receiver<()>,
}

impl GatedExtractor {
    pub fn new() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = bounded(0);
        (Arc::new(Self { gate: rx }), tx)
    }
}

impl MetadataExtractor for GatedExtractor {
    fn extract(&self, _path: &Path) -> MetadataSection {
        let _ = self.gate.recv();
        MetadataSection::default()
    }
}

pub fn default_params() -> AnalysisParameters {
    config::load_config(None).expect("default config").config.analysis_params
}

pub fn scheduler_config(queue_capacity: usize, workers: usize, timeout: Duration) -> SchedulerConfig {
    SchedulerConfig {
        queue_capacity,
        workers,
        worker_timeout: timeout,
    }
}

pub fn start(
    cfg: SchedulerConfig,
    store: Arc<dyn ResultStore>,
    extractor: Arc<dyn MetadataExtractor>,
) -> Scheduler {
    Scheduler::start(cfg, default_params(), store, extractor)
}

/// Write `body` to `dir/name` and register it with `store`.
pub fn register_upload(
    store: &dyn ResultStore,
    dir: &Path,
    name: &str,
    body: &[u8],
) -> SourceFile {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write upload");
    store
        .register_file(NewSourceFile {
            file_name: name.to_string(),
            file_path: path,
            esp_id: "esp-test".to_string(),
            delivery_key: "dk-test".to_string(),
            file_size: body.len() as u64,
            upload_time: Utc::now(),
        })
        .expect("register file")
}

/// Poll until the latest record for `file_id` satisfies `pred`.
pub fn wait_for_record<F>(
    store: &dyn ResultStore,
    file_id: FileId,
    timeout: Duration,
    pred: F,
) -> Option<AnalysisRecord>
where
    F: Fn(&AnalysisRecord) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = store.latest_record_for_file(file_id).expect("query record") {
            if pred(&record) {
                return Some(record);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn wait_for_pending(store: &dyn ResultStore, file_id: FileId) -> AnalysisRecord {
    wait_for_record(store, file_id, Duration::from_secs(5), |r| {
        r.status == AnalysisStatus::Pending
    })
    .expect("worker picked up task")
}

pub fn latest(store: &dyn ResultStore, file_id: FileId) -> Option<AnalysisRecord> {
    store.latest_record_for_file(file_id).expect("query record")
}

pub fn is_analyzed(store: &dyn ResultStore, file_id: FileId) -> bool {
    store
        .get_file(file_id)
        .expect("query file")
        .expect("file exists")
        .analyzed
}
