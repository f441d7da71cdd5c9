//! Pipeline status overview.
//!
//! Backs the `gaceta status` command and the `GET /pipeline/status` route:
//! per-status document counts, chunk and index-entry totals, and the active
//! session snapshot when one exists.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::models::SessionSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub documents: BTreeMap<String, i64>,
    pub total_documents: i64,
    pub total_chunks: i64,
    pub fulltext_entries: i64,
    pub vector_entries: i64,
    pub total_index_entries: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

pub async fn collect_status(
    pool: &SqlitePool,
    session: Option<SessionSnapshot>,
) -> Result<PipelineStatus> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM documents GROUP BY status")
            .fetch_all(pool)
            .await?;
    let documents: BTreeMap<String, i64> = rows.into_iter().collect();
    let total_documents = documents.values().sum();

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let fulltext_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
        .fetch_one(pool)
        .await?;
    let vector_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    Ok(PipelineStatus {
        documents,
        total_documents,
        total_chunks,
        fulltext_entries,
        vector_entries,
        total_index_entries: total_chunks + fulltext_entries + vector_entries,
        session,
    })
}

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let status = collect_status(&pool, None).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Gaceta — Pipeline Status");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", status.total_documents);
    for (state, count) in &status.documents {
        println!("    {:<12} {}", state, count);
    }
    println!();
    println!("  Chunks:      {}", status.total_chunks);
    println!("  Full-text:   {} entries", status.fulltext_entries);
    println!("  Vectors:     {} entries", status.vector_entries);
    println!();

    pool.close().await;
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
