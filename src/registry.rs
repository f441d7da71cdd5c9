//! Document Registry: the durable record of every known bulletin.
//!
//! Intake is content-addressed — registering the same bytes twice (even
//! under different filenames) returns the existing record instead of
//! creating a duplicate. All mutations are atomic per document row; the
//! registry is mutated only by the orchestrator (status, error, timestamps)
//! and the reset controller, never deleted by the pipeline itself.

use anyhow::Result;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{Document, DocumentStatus};

/// Result of one `register` call.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub document: Document,
    /// False when the content hash was already known (idempotent intake).
    pub created: bool,
}

/// Optional filters for `list`.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    pub year: Option<i64>,
    pub section: Option<String>,
}

/// Summary of a `discover` pass over the storage root.
#[derive(Debug, Clone, Default)]
pub struct DiscoverSummary {
    pub registered: usize,
    pub already_known: usize,
    pub marked_missing: usize,
}

/// Metadata derived from the conventional bulletin filename
/// `YYYY-MM-DD_section_rest.pdf`. Files that do not match are registered
/// with no classification.
#[derive(Debug, Clone, Default)]
struct FilenameMeta {
    date: Option<String>,
    year: Option<i64>,
    month: Option<i64>,
    section: Option<String>,
}

fn parse_filename(filename: &str) -> FilenameMeta {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{2})-(\d{2})_([A-Za-z0-9\-]+)").expect("filename pattern")
    });

    match re.captures(filename) {
        Some(caps) => {
            let year: i64 = caps[1].parse().unwrap_or(0);
            let month: i64 = caps[2].parse().unwrap_or(0);
            if year == 0 || !(1..=12).contains(&month) {
                return FilenameMeta::default();
            }
            FilenameMeta {
                date: Some(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3])),
                year: Some(year),
                month: Some(month),
                section: Some(caps[4].to_lowercase()),
            }
        }
        None => FilenameMeta::default(),
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct DocumentRegistry {
    pool: SqlitePool,
}

impl DocumentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a bulletin by filename and raw bytes.
    ///
    /// Computes the content hash; if a document with that hash already
    /// exists the existing record is returned unchanged.
    pub async fn register(&self, filename: &str, bytes: &[u8]) -> Result<RegisterOutcome> {
        let hash = content_hash(bytes);

        if let Some(existing) = self.get_by_hash(&hash).await? {
            debug!(filename, id = existing.id, "duplicate content, reusing record");
            return Ok(RegisterOutcome {
                document: existing,
                created: false,
            });
        }

        let meta = parse_filename(filename);
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (filename, content_hash, size_bytes, date, year, month, section, status, file_present, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 1, ?)
            "#,
        )
        .bind(filename)
        .bind(&hash)
        .bind(bytes.len() as i64)
        .bind(&meta.date)
        .bind(meta.year)
        .bind(meta.month)
        .bind(&meta.section)
        .bind(now)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();

        let document = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document {} vanished after insert", id))?;

        Ok(RegisterOutcome {
            document,
            created: true,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE content_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    pub async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT * FROM documents WHERE 1=1");
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.year.is_some() {
            sql.push_str(" AND year = ?");
        }
        if filter.section.is_some() {
            sql.push_str(" AND section = ?");
        }
        sql.push_str(" ORDER BY date IS NULL, date ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(year) = filter.year {
            query = query.bind(year);
        }
        if let Some(ref section) = filter.section {
            query = query.bind(section.clone());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    /// All pending documents in deterministic batch order: oldest date
    /// first, id as tie-break, undated documents last.
    pub async fn pending_ordered(&self) -> Result<Vec<Document>> {
        self.list(&DocumentFilter {
            status: Some(DocumentStatus::Pending),
            ..Default::default()
        })
        .await
    }

    /// Atomic single-row status update.
    ///
    /// `error` replaces `last_error` verbatim (None clears it).
    /// `processed_at` is stamped on `Completed` and cleared on `Pending`.
    pub async fn set_status(
        &self,
        id: i64,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = match status {
            DocumentStatus::Completed => {
                sqlx::query(
                    "UPDATE documents SET status = ?, last_error = ?, processed_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            DocumentStatus::Pending => {
                sqlx::query(
                    "UPDATE documents SET status = ?, last_error = ?, processed_at = NULL WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            _ => {
                sqlx::query("UPDATE documents SET status = ?, last_error = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(error)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            anyhow::bail!("document {} not found", id);
        }
        Ok(())
    }

    pub async fn mark_file_missing(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET file_present = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_file_present(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET file_present = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM documents GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    /// Walk the storage root for `*.pdf` bulletins and register new ones.
    ///
    /// Also reconciles the file-presence flag: documents whose file
    /// re-appeared are marked present, documents whose file is gone are
    /// marked missing.
    pub async fn discover(&self, root: &Path) -> Result<DiscoverSummary> {
        let mut summary = DiscoverSummary::default();

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_pdf = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false);
            if !is_pdf {
                continue;
            }

            let filename = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = %path.display(), "skipping unreadable file: {}", e);
                    continue;
                }
            };

            let outcome = self.register(&filename, &bytes).await?;
            if outcome.created {
                summary.registered += 1;
            } else {
                summary.already_known += 1;
                if !outcome.document.file_present {
                    self.mark_file_present(outcome.document.id).await?;
                }
            }
        }

        // Sweep for files that disappeared since the last pass.
        let present = sqlx::query("SELECT id, filename FROM documents WHERE file_present = 1")
            .fetch_all(&self.pool)
            .await?;
        for row in &present {
            let id: i64 = row.get("id");
            let filename: String = row.get("filename");
            if !root.join(&filename).exists() {
                self.mark_file_missing(id).await?;
                summary.marked_missing += 1;
            }
        }

        Ok(summary)
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown document status in registry: {}", status_str))?;

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        content_hash: row.get("content_hash"),
        size_bytes: row.get("size_bytes"),
        date: row.get("date"),
        year: row.get("year"),
        month: row.get("month"),
        section: row.get("section"),
        jurisdiction_id: row.get("jurisdiction_id"),
        status,
        last_error: row.get("last_error"),
        processed_at: row.get("processed_at"),
        file_present: row.get::<i64, _>("file_present") != 0,
    })
}
