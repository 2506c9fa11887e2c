//! Store statistics.
//!
//! Summarises what has been ingested into the configured collection: record
//! counts per source, when each source was last ingested, and the vector
//! index definition the records were validated against. Used by `rag stats`
//! to confirm an ingest landed as expected.

use anyhow::Result;

use crate::config::Config;
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    let result = print_stats(config, &store).await;
    store.close().await;
    result
}

async fn print_stats(config: &Config, store: &SqliteStore) -> Result<()> {
    let total = store.count(None).await?;
    let sources = store.source_summaries().await?;
    let indexes = store.list_indexes().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RAG Harness — Store Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", store.collection());
    println!("  Records:     {}", total);

    println!();
    if indexes.is_empty() {
        println!("  Index:       none (run `rag init`)");
    }
    for idx in &indexes {
        println!(
            "  Index:       {} ({} on `{}`, {} dims, model {})",
            idx.name, idx.similarity, idx.path, idx.dims, idx.model
        );
    }

    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<40} {:>8}   {}", "SOURCE", "RECORDS", "LAST INGEST");
        println!("  {}", "-".repeat(68));

        for s in &sources {
            println!(
                "  {:<40} {:>8}   {}",
                s.source,
                s.records,
                format_ts_relative(s.last_ingested)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
