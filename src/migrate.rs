//! Schema creation and vector index provisioning (`rag init`).

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::store::sqlite::SqliteStore;
use crate::store::{provision_index, StoreError, VectorIndex, VectorStore};

/// Create the schema and provision the configured vector index.
///
/// Idempotent. An existing index with a different model or dimension count
/// is an error unless `force` is set, in which case the definition is
/// replaced. Replacing the definition does not delete stored records, but
/// records embedded under a different model or dimension count are no longer
/// searched; re-ingest afterwards.
pub async fn run_init(config: &Config, force: bool) -> Result<()> {
    let store = SqliteStore::connect(&config.db).await?;
    let result = init_index(config, &store, force).await;
    store.close().await;
    result
}

async fn init_index(config: &Config, store: &SqliteStore, force: bool) -> Result<()> {
    println!("Database initialized: {}", config.db.path.display());

    if !config.embedding.is_enabled() {
        println!("  index: skipped (embedding provider disabled)");
        return Ok(());
    }

    let model = config
        .embedding
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model is required to provision the index"))?;
    let dims = config
        .embedding
        .dims
        .ok_or_else(|| anyhow!("embedding.dims is required to provision the index"))?;
    let definition = VectorIndex::cosine(&config.db.index, store.collection(), dims, model);

    if force {
        if let Some(existing) = store.get_index(&definition.name).await? {
            if existing.ensure_compatible(&definition).is_err() {
                let stale = store.count(None).await?;
                if stale > 0 {
                    warn!(
                        index = %definition.name,
                        old_model = %existing.model,
                        records = stale,
                        "replacing index definition; existing records are hidden from search until re-ingested"
                    );
                    println!(
                        "  note: {} records embedded with {} ({} dims) are excluded from search; re-run `rag ingest`",
                        stale, existing.model, existing.dims
                    );
                }
            }
            store.drop_index(&definition.name).await?;
            info!(index = %definition.name, "dropped existing index definition");
        }
    }

    let created = provision_index(store, &definition).await?;
    println!(
        "  index: {} on {}.{} ({} dims, {}) {}",
        definition.name,
        definition.collection,
        definition.path,
        definition.dims,
        definition.model,
        if created { "created" } else { "already present" }
    );
    Ok(())
}

/// Create the record and index tables if they do not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    // Chunk records. Each row carries its full-precision embedding, the
    // packed sign-bit code used by approximate search, and the model that
    // produced the embedding.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            page INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            overlap_prev INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            model TEXT NOT NULL,
            embedding BLOB NOT NULL,
            code BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index definitions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_indexes (
            name TEXT NOT NULL,
            collection TEXT NOT NULL,
            path TEXT NOT NULL,
            dims INTEGER NOT NULL,
            similarity TEXT NOT NULL,
            model TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (collection, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_collection_source ON records(collection, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
