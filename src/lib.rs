pub mod analysis;
pub mod cli;
pub mod config;
pub mod extractor;
pub mod ingest;
pub mod logging;
pub mod patterns;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod util;
