use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Files to ingest and analyse
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// SQLite database for files and analysis results (in-memory when omitted)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Storage directory for uploads (overrides config when set)
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Submitting ESP identifier
    #[arg(long)]
    pub esp_id: String,

    /// Delivery key grouping the uploads
    #[arg(long)]
    pub delivery_key: String,

    /// Encryption password accompanying the delivery
    #[arg(long)]
    pub encryption_password: String,

    /// Number of analysis workers (overrides config when set)
    #[arg(long)]
    pub workers: Option<usize>,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
