//! Destructive reversal of pipeline effects.
//!
//! Resetting deletes a document's chunks and index entries from every
//! store — enabled or not, all three are swept — clears its error, and
//! returns it to `pending`. There is no undo. The all-documents variant
//! additionally requires the caller to send the exact confirmation phrase;
//! a boolean flag is not accepted, given the scale of data loss.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::models::{DocumentStatus, EventData, EventKind};
use crate::pipeline::Pipeline;

/// The phrase `reset_all` demands. Anything else is refused.
pub const RESET_ALL_CONFIRMATION: &str = "RESET ALL DOCUMENTS";

#[derive(Debug)]
pub enum ResetError {
    /// A session is active; resets cannot run under a live batch.
    Busy,
    NotFound(i64),
    /// The all-documents confirmation phrase was absent or wrong.
    ConfirmationRequired,
    Storage(String),
}

impl std::fmt::Display for ResetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetError::Busy => write!(f, "reset refused: a session is active"),
            ResetError::NotFound(id) => write!(f, "document {} not found", id),
            ResetError::ConfirmationRequired => write!(
                f,
                "reset-all requires the confirmation phrase \"{}\"",
                RESET_ALL_CONFIRMATION
            ),
            ResetError::Storage(msg) => write!(f, "reset storage error: {}", msg),
        }
    }
}

impl std::error::Error for ResetError {}

impl From<anyhow::Error> for ResetError {
    fn from(e: anyhow::Error) -> Self {
        ResetError::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for ResetError {
    fn from(e: sqlx::Error) -> Self {
        ResetError::Storage(e.to_string())
    }
}

pub struct ResetController {
    pipeline: Arc<Pipeline>,
}

impl ResetController {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    fn pool(&self) -> &SqlitePool {
        self.pipeline.pool()
    }

    /// Remove one document's derived state and return it to `pending`.
    pub async fn reset_one(&self, id: i64) -> Result<(), ResetError> {
        if self.pipeline.is_busy() {
            return Err(ResetError::Busy);
        }

        let doc = self
            .pipeline
            .registry()
            .get(id)
            .await?
            .ok_or(ResetError::NotFound(id))?;

        self.sweep_document(id).await?;
        self.pipeline
            .registry()
            .set_status(id, DocumentStatus::Pending, None)
            .await?;

        info!(document = id, "document reset");
        self.pipeline.events().emit(
            EventKind::DocumentReset,
            EventData {
                document_id: Some(id),
                filename: Some(doc.filename),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Reset the entire corpus. Irreversible; demands the exact
    /// confirmation phrase.
    pub async fn reset_all(&self, confirm: &str) -> Result<u64, ResetError> {
        if confirm != RESET_ALL_CONFIRMATION {
            return Err(ResetError::ConfirmationRequired);
        }
        if self.pipeline.is_busy() {
            return Err(ResetError::Busy);
        }

        for table in ["chunks", "chunks_fts", "chunk_vectors"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(self.pool())
                .await?;
        }

        let result = sqlx::query(
            "UPDATE documents SET status = 'pending', last_error = NULL, processed_at = NULL",
        )
        .execute(self.pool())
        .await?;
        let total = result.rows_affected();

        info!(total, "corpus reset");
        self.pipeline.events().emit(
            EventKind::PipelineReset,
            EventData {
                total: Some(total),
                ..Default::default()
            },
        );
        Ok(total)
    }

    /// Delete chunks and index entries for one document across all three
    /// stores, whether or not a back-end was enabled when they were written.
    async fn sweep_document(&self, id: i64) -> Result<(), ResetError> {
        for table in ["chunks", "chunks_fts", "chunk_vectors"] {
            sqlx::query(&format!("DELETE FROM {} WHERE document_id = ?", table))
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }
}
