//! Core data models used throughout the Gaceta pipeline.
//!
//! These types represent the bulletins, chunks, events, and session state
//! that flow through the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline state of a registered bulletin.
///
/// `Pending` is the only initial state. `Completed` and `Failed` are terminal
/// until a reset or retry moves the document back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Cleaning,
    Chunking,
    Indexing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Cleaning => "cleaning",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "extracting" => Some(DocumentStatus::Extracting),
            "cleaning" => Some(DocumentStatus::Cleaning),
            "chunking" => Some(DocumentStatus::Chunking),
            "indexing" => Some(DocumentStatus::Indexing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered source bulletin.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    /// SHA-256 digest of the file bytes. Globally unique across documents.
    pub content_hash: String,
    pub size_bytes: i64,
    /// Publication date (`YYYY-MM-DD`) when derivable from the filename.
    pub date: Option<String>,
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub section: Option<String>,
    pub jurisdiction_id: Option<i64>,
    pub status: DocumentStatus,
    pub last_error: Option<String>,
    pub processed_at: Option<i64>,
    /// Whether the raw file is still present under the storage root.
    /// A document can exist as metadata only; processing requires the file.
    pub file_present: bool,
}

/// Optional enrichment tags attached to a chunk. `None` means the
/// corresponding detector was disabled or found nothing to say.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTags {
    pub section_type: Option<String>,
    pub amounts: Option<Vec<String>>,
    pub has_table: Option<bool>,
    pub entities: Option<Vec<String>>,
}

impl ChunkTags {
    pub fn is_empty(&self) -> bool {
        self.section_type.is_none()
            && self.amounts.is_none()
            && self.has_table.is_none()
            && self.entities.is_none()
    }
}

/// A bounded slice of a document's cleaned text, the unit of indexing.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: i64,
    /// Order within the document. Significant and contiguous from 0.
    pub chunk_index: i64,
    pub text: String,
    pub char_len: i64,
    pub tags: ChunkTags,
}

/// The eight event types pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    #[serde(rename = "pipeline.document.started")]
    DocumentStarted,
    #[serde(rename = "pipeline.document.stage")]
    DocumentStage,
    #[serde(rename = "pipeline.document.completed")]
    DocumentCompleted,
    #[serde(rename = "pipeline.document.failed")]
    DocumentFailed,
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    #[serde(rename = "pipeline.reset")]
    PipelineReset,
    #[serde(rename = "pipeline.reset.document")]
    DocumentReset,
}

/// Event payload. Fields are populated per event type; absent fields are
/// omitted from the serialized form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An ephemeral stage-transition notification. Events are not stored; a
/// missed event is recoverable only by querying current registry state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    pub event_type: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl PipelineEvent {
    pub fn new(event_type: EventKind, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Snapshot of the single active session, served to observers that
/// reconnect after missing the live event stream.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub session_id: String,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: bool,
}
