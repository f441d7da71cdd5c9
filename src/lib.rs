//! # Gaceta Pipeline
//!
//! Document ingestion for government bulletins and fiscal-transparency
//! alerts: a raw PDF bulletin goes in, deduplicated, cleaned, chunked, and
//! indexed content comes out, with live progress events along the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌───────────────┐
//! │ Registry │──▶│ Extract → Clean → Chunk → Index │──▶│    SQLite     │
//! │ (intake) │   │        (orchestrator)          │   │ rows+FTS5+vec │
//! └──────────┘   └──────────────┬───────────────┘   └───────────────┘
//!                               │ events
//!                   ┌───────────┴───────────┐
//!                   ▼                       ▼
//!              ┌─────────┐            ┌──────────┐
//!              │   CLI   │            │   HTTP   │
//!              │ (gaceta)│            │ (SSE/API)│
//!              └─────────┘            └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and per-run pipeline options |
//! | [`models`] | Core data types |
//! | [`registry`] | Durable document records, hash-deduplicated intake |
//! | [`extract`] | PDF text extraction (high-fidelity / fast strategies) |
//! | [`clean`] | Toggleable text cleaning sub-operations |
//! | [`chunk`] | Deterministic chunking and enrichment tagging |
//! | [`embedding`] | Embedding providers for the vector back-end |
//! | [`index`] | Relational, full-text, and vector index back-ends |
//! | [`pipeline`] | Stage orchestration, sessions, batch processing |
//! | [`events`] | Broadcast fan-out of stage-transition events |
//! | [`reset`] | Destructive per-document and corpus-wide reset |
//! | [`stats`] | Status counts and totals |
//! | [`progress`] | CLI progress rendering |
//! | [`server`] | HTTP control surface |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod clean;
pub mod config;
pub mod db;
pub mod embedding;
pub mod events;
pub mod extract;
pub mod index;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod reset;
pub mod server;
pub mod stats;
