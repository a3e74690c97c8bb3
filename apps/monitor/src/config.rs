use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use quotegate::GateConfig;
use quotegate_storage_sqlite::get_db_path;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and maintain the quotegate cache", long_about = None)]
pub struct Cli {
    /// JSON gate configuration. Built-in presets when absent.
    #[arg(long, env = "QUOTEGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Cache database file. Defaults to QUOTEGATE_CACHE_PATH, then <data-dir>/api_cache.db.
    #[arg(long, global = true)]
    pub cache_path: Option<String>,

    #[arg(long, env = "QUOTEGATE_DATA_DIR", default_value = "./data", global = true)]
    pub data_dir: String,

    /// `text` or `json`.
    #[arg(long, env = "QUOTEGATE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Entry counts per source.
    CacheStats {
        #[arg(long)]
        json: bool,
    },
    /// Delete expired cache entries.
    Purge,
    /// Delete every cache entry of one source.
    ClearSource { source: String },
    /// Show per-source limits, retry policy and fallback chains.
    Sources {
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and exit.
    CheckConfig,
}

impl Cli {
    pub fn resolved_cache_path(&self) -> String {
        self.cache_path
            .clone()
            .unwrap_or_else(|| get_db_path(&self.data_dir))
    }
}

pub fn load_gate_config(path: Option<&Path>) -> anyhow::Result<GateConfig> {
    match path {
        Some(path) => GateConfig::from_json_file(path)
            .with_context(|| format!("Failed to load gate config from {}", path.display())),
        None => Ok(GateConfig::default()),
    }
}
