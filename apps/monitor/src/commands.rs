use anyhow::Context;
use quotegate::{CacheStats, CacheStore, GateConfig};
use quotegate_storage_sqlite::SqliteCacheStore;

use crate::config::{load_gate_config, Cli, Command};

/// Runs one subcommand and returns what should be printed.
pub fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = load_gate_config(cli.config.as_deref())?;

    match &cli.command {
        Command::CheckConfig => Ok(format!(
            "Configuration OK: {} sources, {} fallback chains",
            config.sources.len(),
            config.fallback_chains.len()
        )),
        Command::Sources { json } => {
            if *json {
                Ok(serde_json::to_string_pretty(&config)?)
            } else {
                Ok(render_sources(&config))
            }
        }
        Command::CacheStats { json } => {
            let store = open_store(cli)?;
            let stats = store.stats()?;
            if *json {
                Ok(serde_json::to_string_pretty(&stats)?)
            } else {
                Ok(render_cache_stats(&stats))
            }
        }
        Command::Purge => {
            let store = open_store(cli)?;
            let removed = store.purge_expired()?;
            tracing::info!("Purged {} expired entries from {}", removed, store.location());
            Ok(format!("Removed {} expired entries", removed))
        }
        Command::ClearSource { source } => {
            let store = open_store(cli)?;
            let removed = store.clear_source(source)?;
            tracing::info!("Cleared {} entries of '{}'", removed, source);
            Ok(format!("Removed {} entries for {}", removed, source))
        }
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<SqliteCacheStore> {
    let path = cli.resolved_cache_path();
    tracing::debug!("Opening cache database at {}", path);
    SqliteCacheStore::open(&path).with_context(|| format!("Failed to open cache at {}", path))
}

pub fn render_cache_stats(stats: &CacheStats) -> String {
    let mut lines = Vec::new();
    if let Some(location) = &stats.location {
        lines.push(format!("Cache: {}", location));
    }
    lines.push(format!("Total entries: {}", stats.total_entries));
    lines.extend(
        stats
            .by_source
            .iter()
            .map(|(source, count)| format!("  {:<16} {:>8}", source, count)),
    );
    lines.join("\n")
}

pub fn render_sources(config: &GateConfig) -> String {
    let mut lines = vec![format!(
        "{:<16} {:>8} {:>10} {:>8} {:>9} {:>8}",
        "source", "capacity", "rate/s", "ttl(s)", "attempts", "backoff"
    )];
    let rows = config
        .sources
        .iter()
        .map(|(id, source)| (id.as_str(), source))
        .chain(std::iter::once(("(default)", &config.default_source)));
    lines.extend(rows.map(|(id, source)| {
        format!(
            "{:<16} {:>8} {:>10.2} {:>8} {:>9} {:>8.2}",
            id,
            source.capacity,
            source.refill_rate,
            source.default_ttl.as_secs(),
            source.retry.max_attempts,
            source.retry.multiplier
        )
    }));

    lines.push(String::new());
    lines.extend(
        config
            .fallback_chains
            .iter()
            .map(|(request_type, chain)| format!("{}: {}", request_type, chain.join(" -> "))),
    );
    lines.join("\n")
}
