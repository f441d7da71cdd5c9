//! Index back-ends: relational chunk rows, FTS5 full text, and vectors.
//!
//! Each back-end is independently toggleable. Re-indexing a document first
//! removes its prior entries from every enabled back-end, then inserts
//! fresh ones — stale duplicates never survive a re-run. Back-ends write
//! sequentially; the first failure stops the stage and the error names the
//! back-end that failed plus the ones that had already succeeded. The
//! document still fails as a whole so retry re-runs everything.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::config::IndexingConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::Chunk;

/// Indexing failure. Fatal for the document even when some back-ends
/// succeeded.
#[derive(Debug)]
pub struct IndexingError {
    pub backend: &'static str,
    pub message: String,
    /// Back-ends that completed their write before the failure.
    pub succeeded: Vec<&'static str>,
}

impl std::fmt::Display for IndexingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "index back-end '{}' failed: {}", self.backend, self.message)?;
        if !self.succeeded.is_empty() {
            write!(f, " (already written: {})", self.succeeded.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for IndexingError {}

/// One index target. Implementations must make `remove_document` followed
/// by `insert_chunks` leave exactly the given chunks attributed to the
/// document.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn remove_document(&self, document_id: i64) -> Result<()>;
    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()>;
}

/// The indexing stage: an ordered set of enabled back-ends.
pub struct Indexer {
    backends: Vec<Box<dyn IndexBackend>>,
}

impl Indexer {
    /// Assemble the back-ends enabled by `config`.
    pub fn from_config(pool: SqlitePool, config: &IndexingConfig) -> Result<Self> {
        let mut backends: Vec<Box<dyn IndexBackend>> = Vec::new();
        if config.use_relational {
            backends.push(Box::new(RelationalBackend { pool: pool.clone() }));
        }
        if config.use_fulltext {
            backends.push(Box::new(FulltextBackend { pool: pool.clone() }));
        }
        if config.use_vector {
            let model = config
                .embedding_model
                .as_deref()
                .filter(|m| !m.is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!("indexing.embedding_model must be set when use_vector = true")
                })?;
            let provider = embedding::create_provider(model)?;
            backends.push(Box::new(VectorBackend { pool, provider }));
        }
        Ok(Self { backends })
    }

    /// Explicit back-end list. Test seam and extension point.
    pub fn with_backends(backends: Vec<Box<dyn IndexBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Remove-then-insert for one document across all enabled back-ends.
    pub async fn index_document(
        &self,
        document_id: i64,
        chunks: &[Chunk],
    ) -> Result<(), IndexingError> {
        // Clear prior entries everywhere first so a partial failure can
        // never leave stale rows from an earlier run.
        let mut cleared: Vec<&'static str> = Vec::new();
        for backend in &self.backends {
            backend
                .remove_document(document_id)
                .await
                .map_err(|e| IndexingError {
                    backend: backend.name(),
                    message: format!("clearing prior entries: {}", e),
                    succeeded: std::mem::take(&mut cleared),
                })?;
            cleared.push(backend.name());
        }

        let mut succeeded: Vec<&'static str> = Vec::new();
        for backend in &self.backends {
            backend
                .insert_chunks(document_id, chunks)
                .await
                .map_err(|e| IndexingError {
                    backend: backend.name(),
                    message: e.to_string(),
                    succeeded: std::mem::take(&mut succeeded),
                })?;
            succeeded.push(backend.name());
        }

        Ok(())
    }
}

// ============ Relational ============

/// Chunk rows in the `chunks` table, the store exact lookups and joins
/// run against.
pub struct RelationalBackend {
    pool: SqlitePool,
}

#[async_trait]
impl IndexBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn remove_document(&self, document_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let amounts_json = chunk
                .tags
                .amounts
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let entities_json = chunk
                .tags
                .entities
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, char_len, section_type, amounts_json, has_table, entities_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.char_len)
            .bind(&chunk.tags.section_type)
            .bind(amounts_json)
            .bind(chunk.tags.has_table)
            .bind(entities_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============ Full text ============

/// FTS5 rows for ranked keyword search.
pub struct FulltextBackend {
    pool: SqlitePool,
}

#[async_trait]
impl IndexBackend for FulltextBackend {
    fn name(&self) -> &'static str {
        "fulltext"
    }

    async fn remove_document(&self, document_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============ Vector ============

/// Embedded chunk vectors for nearest-neighbor semantic search.
pub struct VectorBackend {
    pool: SqlitePool,
    provider: Box<dyn EmbeddingProvider>,
}

#[async_trait]
impl IndexBackend for VectorBackend {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn remove_document(&self, document_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.provider.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(self.provider.model_name())
            .bind(self.provider.dims() as i64)
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::ChunkTags;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn sample_chunks(document_id: i64, n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                id: format!("chunk-{}-{}", document_id, i),
                document_id,
                chunk_index: i as i64,
                text: format!("texto del fragmento {}", i),
                char_len: 20,
                tags: ChunkTags::default(),
            })
            .collect()
    }

    /// Insert a minimal parent `documents` row so chunk inserts satisfy the
    /// `chunks.document_id` foreign key (enforced by sqlx's default
    /// `PRAGMA foreign_keys = ON`, as in production).
    async fn seed_document(pool: &SqlitePool, id: i64) {
        sqlx::query(
            "INSERT INTO documents (id, filename, content_hash, size_bytes, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("doc-{}.pdf", id))
        .bind(format!("hash-{}", id))
        .bind(100_i64)
        .bind(0_i64)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn count(pool: &SqlitePool, table: &str, document_id: i64) -> i64 {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE document_id = ?",
            table
        ))
        .bind(document_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    /// Scripted back-end for failure-ordering tests.
    struct MockBackend {
        backend_name: &'static str,
        fail_insert: AtomicBool,
        inserted: Arc<Mutex<Vec<usize>>>,
    }

    impl MockBackend {
        fn new(backend_name: &'static str, fail_insert: bool) -> Self {
            Self {
                backend_name,
                fail_insert: AtomicBool::new(fail_insert),
                inserted: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl IndexBackend for MockBackend {
        fn name(&self) -> &'static str {
            self.backend_name
        }

        async fn remove_document(&self, _document_id: i64) -> Result<()> {
            self.inserted.lock().unwrap().clear();
            Ok(())
        }

        async fn insert_chunks(&self, _document_id: i64, chunks: &[Chunk]) -> Result<()> {
            if self.fail_insert.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inserted.lock().unwrap().push(chunks.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn relational_reindex_replaces_rows() {
        let pool = test_pool().await;
        let backend = RelationalBackend { pool: pool.clone() };
        seed_document(&pool, 1).await;

        backend.insert_chunks(1, &sample_chunks(1, 3)).await.unwrap();
        assert_eq!(count(&pool, "chunks", 1).await, 3);

        // Re-run with different chunk ids: remove-then-insert, no stale rows.
        backend.remove_document(1).await.unwrap();
        let fresh: Vec<Chunk> = sample_chunks(1, 2)
            .into_iter()
            .map(|mut c| {
                c.id = format!("fresh-{}", c.chunk_index);
                c
            })
            .collect();
        backend.insert_chunks(1, &fresh).await.unwrap();
        assert_eq!(count(&pool, "chunks", 1).await, 2);
    }

    #[tokio::test]
    async fn fulltext_rows_follow_document() {
        let pool = test_pool().await;
        let backend = FulltextBackend { pool: pool.clone() };

        backend.insert_chunks(7, &sample_chunks(7, 4)).await.unwrap();
        backend.insert_chunks(8, &sample_chunks(8, 1)).await.unwrap();
        assert_eq!(count(&pool, "chunks_fts", 7).await, 4);

        backend.remove_document(7).await.unwrap();
        assert_eq!(count(&pool, "chunks_fts", 7).await, 0);
        assert_eq!(count(&pool, "chunks_fts", 8).await, 1);
    }

    #[tokio::test]
    async fn relational_preserves_tags() {
        let pool = test_pool().await;
        let backend = RelationalBackend { pool: pool.clone() };
        seed_document(&pool, 3).await;

        let mut chunks = sample_chunks(3, 1);
        chunks[0].tags = ChunkTags {
            section_type: Some("budget".to_string()),
            amounts: Some(vec!["$5,000.00".to_string()]),
            has_table: Some(true),
            entities: None,
        };
        backend.insert_chunks(3, &chunks).await.unwrap();

        use sqlx::Row;
        let row = sqlx::query("SELECT section_type, amounts_json, has_table FROM chunks WHERE document_id = 3")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<Option<String>, _>("section_type").as_deref(), Some("budget"));
        assert!(row.get::<Option<String>, _>("amounts_json").unwrap().contains("5,000.00"));
        assert_eq!(row.get::<Option<bool>, _>("has_table"), Some(true));
    }

    #[tokio::test]
    async fn first_backend_failure_stops_later_backends() {
        // Relational fails: full-text must end with zero entries.
        let failing = Box::new(MockBackend::new("relational", true));
        let second = Box::new(MockBackend::new("fulltext", false));
        let second_inserted = Arc::clone(&second.inserted);

        let backends: Vec<Box<dyn IndexBackend>> = vec![failing, second];
        let indexer = Indexer::with_backends(backends);
        let err = indexer
            .index_document(1, &sample_chunks(1, 2))
            .await
            .unwrap_err();

        assert_eq!(err.backend, "relational");
        assert!(err.succeeded.is_empty());
        assert!(second_inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_failure_reports_earlier_successes() {
        let first = Box::new(MockBackend::new("relational", false));
        let failing = Box::new(MockBackend::new("vector", true));

        let backends: Vec<Box<dyn IndexBackend>> = vec![first, failing];
        let indexer = Indexer::with_backends(backends);
        let err = indexer
            .index_document(1, &sample_chunks(1, 2))
            .await
            .unwrap_err();

        assert_eq!(err.backend, "vector");
        assert_eq!(err.succeeded, vec!["relational"]);
        assert!(err.to_string().contains("already written: relational"));
    }

    #[tokio::test]
    async fn from_config_assembles_enabled_backends() {
        let pool = test_pool().await;
        let config = IndexingConfig {
            use_relational: true,
            use_fulltext: true,
            use_vector: false,
            embedding_model: None,
        };
        let indexer = Indexer::from_config(pool, &config).unwrap();
        assert_eq!(indexer.backend_names(), vec!["relational", "fulltext"]);
    }

    #[tokio::test]
    async fn from_config_rejects_vector_without_model() {
        let pool = test_pool().await;
        let config = IndexingConfig {
            use_relational: false,
            use_fulltext: false,
            use_vector: true,
            embedding_model: None,
        };
        assert!(Indexer::from_config(pool, &config).is_err());
    }
}
