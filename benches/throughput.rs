use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use depotscan::config;
use depotscan::extractor::{MetadataExtractor, MetadataSection};
use depotscan::patterns;
use depotscan::scheduler::{Scheduler, SchedulerConfig};
use depotscan::store::memory::MemoryStore;
use depotscan::store::{NewSourceFile, ResultStore};

struct NoopExtractor;

impl MetadataExtractor for NoopExtractor {
    fn extract(&self, _path: &Path) -> MetadataSection {
        MetadataSection::default()
    }
}

fn text_corpus(size: usize, with_hits: bool) -> Vec<u8> {
    let filler = b"quarterly numbers look fine, nothing to report here. ";
    let mut data = Vec::with_capacity(size + 64);
    while data.len() < size {
        data.extend_from_slice(filler);
    }
    data.truncate(size);
    if with_hits {
        let mid = size / 2;
        data[mid..mid + 12].copy_from_slice(b"CONFIDENTIAL");
        data.extend_from_slice(b" api_key=abc IBAN DE00");
    }
    data
}

fn bench_pattern_scan(c: &mut Criterion) {
    let params = config::load_config(None).expect("config").config.analysis_params;
    let mut group = c.benchmark_group("patterns");
    for size in [64 * 1024usize, 4 * 1024 * 1024usize] {
        group.throughput(Throughput::Bytes(size as u64));
        for with_hits in [false, true] {
            let data = text_corpus(size, with_hits);
            let label = if with_hits { "hits" } else { "clean" };
            group.bench_with_input(BenchmarkId::new(label, size), &data, |b, data| {
                b.iter(|| patterns::scan(data, &params.content_patterns));
            });
        }
    }
    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let input_path = temp_dir.path().join("upload.txt");
    std::fs::write(&input_path, text_corpus(256 * 1024, true)).expect("write");
    let params = config::load_config(None).expect("config").config.analysis_params;

    let mut group = c.benchmark_group("scheduler");
    group.sample_size(10);
    group.bench_function("analyze_64_files", |b| {
        b.iter(|| {
            let store: Arc<dyn ResultStore> = Arc::new(MemoryStore::new());
            let scheduler = Scheduler::start(
                SchedulerConfig {
                    queue_capacity: 64,
                    workers: 4,
                    worker_timeout: Duration::from_secs(30),
                },
                params.clone(),
                Arc::clone(&store),
                Arc::new(NoopExtractor),
            );
            for idx in 0..64 {
                let file = store
                    .register_file(NewSourceFile {
                        file_name: format!("upload-{idx}.txt"),
                        file_path: input_path.clone(),
                        esp_id: "bench".to_string(),
                        delivery_key: "bench".to_string(),
                        file_size: 256 * 1024,
                        upload_time: Utc::now(),
                    })
                    .expect("register");
                scheduler.submit(&file);
            }
            scheduler.shutdown()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_pattern_scan, bench_scheduler);
criterion_main!(benches);
