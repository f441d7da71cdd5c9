//! Pipeline orchestration.
//!
//! Drives a document through extraction → cleaning → chunking → indexing,
//! persisting registry status and emitting an event after each transition.
//! A batch processes all pending documents sequentially, oldest date first;
//! one logical worker at a time is the concurrency control: exactly one
//! session may be active system-wide, and competing requests are rejected
//! as busy rather than queued.
//!
//! Retry is whole-document: a failed document re-runs every stage from
//! extraction, never resuming mid-pipeline.

use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{self, ChunkingError};
use crate::clean;
use crate::config::PipelineConfig;
use crate::events::EventBroadcaster;
use crate::extract::{self, ExtractionError};
use crate::index::{Indexer, IndexingError};
use crate::models::{
    BatchSummary, Document, DocumentStatus, EventData, EventKind, SessionSnapshot,
};
use crate::registry::DocumentRegistry;

/// Error from a stage executor. Fatal for the document; the message is
/// retained verbatim as its last error.
#[derive(Debug)]
pub enum StageError {
    Extraction(ExtractionError),
    Chunking(ChunkingError),
    Indexing(IndexingError),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Extraction(e) => e.fmt(f),
            StageError::Chunking(e) => e.fmt(f),
            StageError::Indexing(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for StageError {}

/// Orchestration-level error, distinct from per-document stage failures.
#[derive(Debug)]
pub enum PipelineError {
    /// Another session is active; the request is rejected, not queued.
    Busy,
    NotFound(i64),
    InvalidConfig(String),
    Storage(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Busy => write!(f, "pipeline busy: a session is already active"),
            PipelineError::NotFound(id) => write!(f, "document {} not found", id),
            PipelineError::InvalidConfig(msg) => write!(f, "invalid pipeline config: {}", msg),
            PipelineError::Storage(msg) => write!(f, "pipeline storage error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: String,
    total: u64,
    completed: u64,
    failed: u64,
    current_filename: Option<String>,
    current_stage: Option<String>,
}

/// Clears the session slot when the run ends, on every exit path.
pub(crate) struct SessionGuard {
    slot: Arc<Mutex<Option<ActiveSession>>>,
    id: String,
}

impl SessionGuard {
    fn update<F: FnOnce(&mut ActiveSession)>(&self, f: F) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(session) = slot.as_mut() {
                f(session);
            }
        }
    }

    fn set_total(&self, total: u64) {
        self.update(|s| s.total = total);
    }

    fn set_current(&self, filename: &str, stage: DocumentStatus) {
        self.update(|s| {
            s.current_filename = Some(filename.to_string());
            s.current_stage = Some(stage.as_str().to_string());
        });
    }

    fn record(&self, completed: bool) {
        self.update(|s| {
            if completed {
                s.completed += 1;
            } else {
                s.failed += 1;
            }
            s.current_filename = None;
            s.current_stage = None;
        });
    }

    fn counters(&self) -> (u64, u64) {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|s| (s.completed, s.failed)))
            .unwrap_or((0, 0))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

pub struct Pipeline {
    pool: SqlitePool,
    registry: DocumentRegistry,
    events: EventBroadcaster,
    storage_root: PathBuf,
    session: Arc<Mutex<Option<ActiveSession>>>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, storage_root: PathBuf, events: EventBroadcaster) -> Self {
        let registry = DocumentRegistry::new(pool.clone());
        Self {
            pool,
            registry,
            events,
            storage_root,
            session: Arc::new(Mutex::new(None)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn session_snapshot(&self) -> Option<SessionSnapshot> {
        let slot = self.session.lock().ok()?;
        slot.as_ref().map(|s| SessionSnapshot {
            session_id: s.id.clone(),
            total: s.total,
            completed: s.completed,
            failed: s.failed,
            current_filename: s.current_filename.clone(),
            current_stage: s.current_stage.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.session
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Request cancellation of the active batch. Takes effect between
    /// documents; a document mid-stage runs to completion or failure first.
    /// The cooperative check runs before each document, including the first.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Claim the single session slot, or reject as busy.
    pub(crate) fn claim_session(&self, total: u64) -> Result<SessionGuard, PipelineError> {
        let mut slot = self
            .session
            .lock()
            .map_err(|_| PipelineError::Storage("session lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(PipelineError::Busy);
        }
        let id = Uuid::new_v4().to_string();
        *slot = Some(ActiveSession {
            id: id.clone(),
            total,
            completed: 0,
            failed: 0,
            current_filename: None,
            current_stage: None,
        });
        Ok(SessionGuard {
            slot: Arc::clone(&self.session),
            id,
        })
    }

    fn validate(config: &PipelineConfig) -> Result<(), PipelineError> {
        crate::config::validate_pipeline(config)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Process one document end-to-end. Rejected while a session is
    /// active. Retrying a failed document always restarts from extraction.
    pub async fn process_document(
        &self,
        id: i64,
        config: &PipelineConfig,
    ) -> Result<DocumentStatus, PipelineError> {
        Self::validate(config)?;

        let doc = self
            .registry
            .get(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;

        let guard = self.claim_session(1)?;
        let status = self.run_one(&doc, config, &guard, 1, 1).await?;
        Ok(status)
    }

    /// Process every pending document, sequentially, oldest date first.
    ///
    /// Per-document failures are recorded and the batch continues; the
    /// batch itself never aborts because one document failed.
    pub async fn process_all_pending(
        &self,
        config: &PipelineConfig,
    ) -> Result<BatchSummary, PipelineError> {
        Self::validate(config)?;
        let guard = self.claim_session(0)?;
        self.run_batch(guard, config).await
    }

    /// Claim the session and run the batch on a background task. Returns
    /// the session id immediately; busy and config errors are still
    /// rejected synchronously.
    pub fn start_batch(self: &Arc<Self>, config: PipelineConfig) -> Result<String, PipelineError> {
        Self::validate(&config)?;
        let guard = self.claim_session(0)?;
        let session_id = guard.id.clone();
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_batch(guard, &config).await {
                tracing::error!("batch run failed: {}", e);
            }
        });
        Ok(session_id)
    }

    async fn run_batch(
        &self,
        guard: SessionGuard,
        config: &PipelineConfig,
    ) -> Result<BatchSummary, PipelineError> {
        let docs = self.registry.pending_ordered().await?;
        let total = docs.len() as u64;
        guard.set_total(total);

        info!(session = %guard.id, total, "batch started");
        self.events.emit(
            EventKind::PipelineStarted,
            EventData {
                session_id: Some(guard.id.clone()),
                total: Some(total),
                ..Default::default()
            },
        );

        let mut cancelled = false;
        for (i, doc) in docs.iter().enumerate() {
            if self.cancel.swap(false, Ordering::SeqCst) {
                info!(session = %guard.id, "batch cancelled after {} documents", i);
                cancelled = true;
                break;
            }

            let current = i as u64 + 1;
            self.events.emit(
                EventKind::DocumentStarted,
                EventData {
                    session_id: Some(guard.id.clone()),
                    document_id: Some(doc.id),
                    filename: Some(doc.filename.clone()),
                    current: Some(current),
                    total: Some(total),
                    ..Default::default()
                },
            );

            self.run_one(doc, config, &guard, current, total).await?;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let (completed, failed) = guard.counters();
        self.events.emit(
            EventKind::PipelineCompleted,
            EventData {
                session_id: Some(guard.id.clone()),
                total: Some(total),
                completed: Some(completed),
                failed: Some(failed),
                ..Default::default()
            },
        );
        info!(session = %guard.id, completed, failed, cancelled, "batch finished");

        Ok(BatchSummary {
            session_id: guard.id.clone(),
            total,
            completed,
            failed,
            cancelled,
        })
    }

    /// Run all stages for one document, mapping stage errors to `failed`
    /// status. Only infrastructure errors propagate.
    async fn run_one(
        &self,
        doc: &Document,
        config: &PipelineConfig,
        guard: &SessionGuard,
        current: u64,
        total: u64,
    ) -> Result<DocumentStatus, PipelineError> {
        match self.run_stages(doc, config, guard, current, total).await {
            Ok(chunk_count) => {
                self.registry
                    .set_status(doc.id, DocumentStatus::Completed, None)
                    .await?;
                guard.record(true);
                info!(document = doc.id, chunks = chunk_count, "document completed");
                self.events.emit(
                    EventKind::DocumentCompleted,
                    EventData {
                        session_id: Some(guard.id.clone()),
                        document_id: Some(doc.id),
                        filename: Some(doc.filename.clone()),
                        current: Some(current),
                        total: Some(total),
                        ..Default::default()
                    },
                );
                Ok(DocumentStatus::Completed)
            }
            Err(RunError::Stage(e)) => {
                let message = e.to_string();
                warn!(document = doc.id, error = %message, "document failed");
                self.registry
                    .set_status(doc.id, DocumentStatus::Failed, Some(&message))
                    .await?;
                guard.record(false);
                self.events.emit(
                    EventKind::DocumentFailed,
                    EventData {
                        session_id: Some(guard.id.clone()),
                        document_id: Some(doc.id),
                        filename: Some(doc.filename.clone()),
                        current: Some(current),
                        total: Some(total),
                        error: Some(message),
                        ..Default::default()
                    },
                );
                Ok(DocumentStatus::Failed)
            }
            Err(RunError::Infra(e)) => Err(e),
        }
    }

    async fn enter_stage(
        &self,
        doc: &Document,
        stage: DocumentStatus,
        guard: &SessionGuard,
        current: u64,
        total: u64,
    ) -> Result<(), PipelineError> {
        self.registry.set_status(doc.id, stage, None).await?;
        guard.set_current(&doc.filename, stage);
        self.events.emit(
            EventKind::DocumentStage,
            EventData {
                session_id: Some(guard.id.clone()),
                document_id: Some(doc.id),
                filename: Some(doc.filename.clone()),
                stage: Some(stage.as_str().to_string()),
                current: Some(current),
                total: Some(total),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// The stage sequence proper. Returns the number of chunks produced.
    async fn run_stages(
        &self,
        doc: &Document,
        config: &PipelineConfig,
        guard: &SessionGuard,
        current: u64,
        total: u64,
    ) -> Result<usize, RunError> {
        // Extraction
        self.enter_stage(doc, DocumentStatus::Extracting, guard, current, total)
            .await?;

        let path = self.storage_root.join(&doc.filename);
        if !path.exists() {
            self.registry
                .mark_file_missing(doc.id)
                .await
                .map_err(PipelineError::from)?;
            return Err(StageError::Extraction(ExtractionError::FileMissing(
                doc.filename.clone(),
            ))
            .into());
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StageError::Extraction(ExtractionError::Unreadable(e.to_string())))?;

        let extractor = extract::create_extractor(&config.extraction)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| PipelineError::Storage(format!("extraction task failed: {}", e)))?
            .map_err(StageError::Extraction)?;
        info!(
            document = doc.id,
            pages = extraction.page_count,
            chars = extraction.text.chars().count(),
            "extracted"
        );

        // Cleaning
        self.enter_stage(doc, DocumentStatus::Cleaning, guard, current, total)
            .await?;
        let cleaned = clean::clean_text(&extraction.text, &config.cleaning);
        for warning in &cleaned.warnings {
            warn!(document = doc.id, "{}", warning);
        }

        // Chunking (+ enrichment)
        self.enter_stage(doc, DocumentStatus::Chunking, guard, current, total)
            .await?;
        let chunks = chunk::chunk_document(doc.id, &cleaned.text, &config.chunking, &config.enrichment)
            .map_err(StageError::Chunking)?;

        // Indexing
        self.enter_stage(doc, DocumentStatus::Indexing, guard, current, total)
            .await?;
        let indexer = Indexer::from_config(self.pool.clone(), &config.indexing).map_err(|e| {
            StageError::Indexing(IndexingError {
                backend: "vector",
                message: e.to_string(),
                succeeded: Vec::new(),
            })
        })?;
        indexer
            .index_document(doc.id, &chunks)
            .await
            .map_err(StageError::Indexing)?;

        Ok(chunks.len())
    }
}

enum RunError {
    Stage(StageError),
    Infra(PipelineError),
}

impl From<StageError> for RunError {
    fn from(e: StageError) -> Self {
        RunError::Stage(e)
    }
}

impl From<PipelineError> for RunError {
    fn from(e: PipelineError) -> Self {
        RunError::Infra(e)
    }
}
