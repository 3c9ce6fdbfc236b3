use std::fs::File;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use depotscan::{
    cli,
    config,
    extractor::{self, MetadataExtractor},
    ingest::{self, UploadRequest},
    logging,
    scheduler::{Scheduler, SchedulerConfig},
    store::{self, ResultReport, ResultStore},
    util,
};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();
    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(storage) = cli_opts.storage.clone() {
        cfg.storage_path = storage;
    }
    if let Some(workers) = cli_opts.workers {
        cfg.worker_pool.max_concurrent_analysis = workers;
    }
    util::ensure_storage_dir(&cfg.storage_path)
        .with_context(|| format!("storage path {}", cfg.storage_path.display()))?;

    info!(
        "starting depotscan config_hash={} storage={} db={} inputs={}",
        loaded.config_hash,
        cfg.storage_path.display(),
        cli_opts
            .db
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string()),
        cli_opts.inputs.len()
    );

    let result_store: Arc<dyn ResultStore> = Arc::from(store::build_store(cli_opts.db.as_deref())?);
    let metadata_extractor: Arc<dyn MetadataExtractor> =
        Arc::from(extractor::build_extractor(&cfg.analysis_params));
    let scheduler = Scheduler::start(
        SchedulerConfig::from_pool(&cfg.worker_pool),
        cfg.analysis_params.clone(),
        Arc::clone(&result_store),
        metadata_extractor,
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(err) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to install interrupt handler: {err}");
        }
    }

    let mut ingested = Vec::with_capacity(cli_opts.inputs.len());
    for input in &cli_opts.inputs {
        if interrupted.load(Ordering::SeqCst) {
            warn!("interrupted; not ingesting remaining inputs");
            break;
        }
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let req = UploadRequest {
            file_name,
            esp_id: cli_opts.esp_id.clone(),
            delivery_key: cli_opts.delivery_key.clone(),
            encryption_password: cli_opts.encryption_password.clone(),
        };
        let mut reader = match File::open(input) {
            Ok(file) => file,
            Err(err) => {
                warn!("skipping {}: {err}", input.display());
                continue;
            }
        };
        match ingest::ingest_upload(
            &cfg.storage_path,
            result_store.as_ref(),
            &scheduler,
            &req,
            &mut reader,
        ) {
            Ok(receipt) => ingested.push(receipt.file.id),
            Err(err) => warn!("failed to ingest {}: {err}", input.display()),
        }
    }

    let stats = scheduler.shutdown();

    for file_id in ingested {
        match result_store.latest_record_for_file(file_id)? {
            Some(record) => {
                println!("{}", serde_json::to_string(&ResultReport::from(&record))?);
            }
            None => warn!("no analysis result for file_id={file_id}"),
        }
    }

    info!(
        "depotscan finished submitted={} dropped={} completed={} failed={} timed_out={}",
        stats.submitted, stats.dropped, stats.completed, stats.failed, stats.timed_out
    );
    Ok(())
}
