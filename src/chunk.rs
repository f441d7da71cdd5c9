//! Deterministic character-window chunker with enrichment tagging.
//!
//! Chunk starts advance by `chunk_size` characters; every chunk except the
//! last carries `chunk_overlap` additional trailing characters, so
//! consecutive chunks share exactly `chunk_overlap` characters. Identical
//! input and configuration always yield identical boundaries and count.
//!
//! When table detection is enabled, a detected table is never split: the
//! chunk that starts before it swallows it whole, even past `chunk_size`.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::config::{ChunkingConfig, EnrichmentConfig};
use crate::models::{Chunk, ChunkTags};

/// Chunking configuration inconsistency. Rejected before a batch starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    ZeroChunkSize,
    MinExceedsChunkSize { min: usize, size: usize },
    OverlapExceedsChunkSize { overlap: usize, size: usize },
}

impl std::fmt::Display for ChunkingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkingError::ZeroChunkSize => write!(f, "chunking.chunk_size must be > 0"),
            ChunkingError::MinExceedsChunkSize { min, size } => write!(
                f,
                "chunking.min_chunk_size ({}) must not exceed chunk_size ({})",
                min, size
            ),
            ChunkingError::OverlapExceedsChunkSize { overlap, size } => write!(
                f,
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, size
            ),
        }
    }
}

impl std::error::Error for ChunkingError {}

pub fn validate(config: &ChunkingConfig) -> Result<(), ChunkingError> {
    if config.chunk_size == 0 {
        return Err(ChunkingError::ZeroChunkSize);
    }
    if config.min_chunk_size > config.chunk_size {
        return Err(ChunkingError::MinExceedsChunkSize {
            min: config.min_chunk_size,
            size: config.chunk_size,
        });
    }
    if config.chunk_overlap >= config.chunk_size {
        return Err(ChunkingError::OverlapExceedsChunkSize {
            overlap: config.chunk_overlap,
            size: config.chunk_size,
        });
    }
    Ok(())
}

/// Split cleaned text into chunks for `document_id`.
pub fn chunk_document(
    document_id: i64,
    text: &str,
    chunking: &ChunkingConfig,
    enrichment: &EnrichmentConfig,
) -> Result<Vec<Chunk>, ChunkingError> {
    validate(chunking)?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Char-indexed view so window math never lands inside a UTF-8 sequence.
    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n = offsets.len();
    let byte_at = |char_idx: usize| -> usize {
        if char_idx < n {
            offsets[char_idx]
        } else {
            text.len()
        }
    };

    let protected = if enrichment.enabled && enrichment.detect_tables {
        table_spans(text)
    } else {
        Vec::new()
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < n {
        let mut payload_end = (start + chunking.chunk_size).min(n);

        // Never split inside a protected unit: swallow it whole.
        if payload_end < n {
            for &(span_start, span_end) in &protected {
                if span_start >= payload_end {
                    break;
                }
                if span_start < payload_end && span_end > payload_end {
                    payload_end = span_end.min(n);
                }
            }
        }

        let is_final = payload_end >= n;
        let end = if is_final {
            n
        } else {
            (payload_end + chunking.chunk_overlap).min(n)
        };

        let slice = &text[byte_at(start)..byte_at(end)];
        let char_len = end - start;
        let keep = !slice.trim().is_empty() && (char_len >= chunking.min_chunk_size || is_final);

        if keep {
            let tags = enrich(slice, enrichment);
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_id,
                chunk_index: index,
                text: slice.to_string(),
                char_len: char_len as i64,
                tags,
            });
            index += 1;
        }

        start = payload_end;
    }

    Ok(chunks)
}

/// Per-chunk tags. Detectors only speak up when they find something;
/// a disabled or silent detector leaves its tag as `None`.
fn enrich(text: &str, config: &EnrichmentConfig) -> ChunkTags {
    if !config.enabled {
        return ChunkTags::default();
    }

    let mut tags = ChunkTags::default();

    if config.detect_section_type {
        tags.section_type = classify_section(text);
    }
    if config.detect_amounts {
        let amounts = detect_amounts(text);
        if !amounts.is_empty() {
            tags.amounts = Some(amounts);
        }
    }
    if config.detect_tables && has_table(text) {
        tags.has_table = Some(true);
    }
    if config.extract_entities {
        let entities = extract_entities(text);
        if !entities.is_empty() {
            tags.entities = Some(entities);
        }
    }

    tags
}

/// Bulletin section headings, most specific first. First match wins.
fn classify_section(text: &str) -> Option<String> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"(?i)\bpresupuesto\b|\begresos\b", "budget"),
            (r"(?i)\blicitaci[óo]n\b|\bconvocatoria\b", "tender"),
            (r"(?i)\bcontrato\b|\badjudicaci[óo]n\b", "contract"),
            (r"(?i)\bdecreto\b", "decree"),
            (r"(?i)\bacuerdo\b", "agreement"),
            (r"(?i)\bresoluci[óo]n\b", "resolution"),
            (r"(?i)\bedicto\b", "edict"),
            (r"(?i)\baviso\b|\bnotificaci[óo]n\b", "notice"),
        ]
        .into_iter()
        .filter_map(|(p, tag)| Regex::new(p).ok().map(|re| (re, tag)))
        .collect()
    });

    rules
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, tag)| tag.to_string())
}

/// Monetary amounts: `$1,234,567.89` or `1,234.00 MXN/USD/pesos`.
fn detect_amounts(text: &str) -> Vec<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PATTERN.get_or_init(|| {
        Regex::new(
            r"\$\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})?|\b\d{1,3}(?:,\d{3})+(?:\.\d{2})?\s?(?:MXN|USD|pesos)\b",
        )
        .ok()
    }) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    re.find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

/// A table is three or more consecutive lines with columnar structure
/// (two or more wide gaps, or pipe separators).
fn is_table_line(line: &str) -> bool {
    let trimmed = line.trim_end();
    if trimmed.matches('|').count() >= 2 {
        return true;
    }
    let mut gaps = 0usize;
    let mut spaces = 0usize;
    let mut seen_text = false;
    for c in trimmed.chars() {
        if c == ' ' {
            spaces += 1;
        } else {
            if seen_text && spaces >= 3 {
                gaps += 1;
            }
            seen_text = true;
            spaces = 0;
        }
    }
    gaps >= 2
}

fn has_table(text: &str) -> bool {
    let mut run = 0usize;
    for line in text.lines() {
        if is_table_line(line) {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Char-coordinate spans of detected tables in the full text, sorted and
/// non-overlapping. Used as non-splittable units during windowing.
fn table_spans(text: &str) -> Vec<(usize, usize)> {
    // Line boundaries in char coordinates.
    let mut lines: Vec<(usize, usize, bool)> = Vec::new(); // (start, end, is_table)
    let mut pos = 0usize;
    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        let body = line.strip_suffix('\n').unwrap_or(line);
        lines.push((pos, pos + len, is_table_line(body)));
        pos += len;
    }

    let mut spans = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut run_len = 0usize;
    for (i, &(start, _end, is_table)) in lines.iter().enumerate() {
        if is_table {
            if run_start.is_none() {
                run_start = Some(start);
            }
            run_len += 1;
        } else {
            if let Some(s) = run_start {
                if run_len >= 3 {
                    spans.push((s, lines[i - 1].1));
                }
            }
            run_start = None;
            run_len = 0;
        }
    }
    if let Some(s) = run_start {
        if run_len >= 3 {
            spans.push((s, lines[lines.len() - 1].1));
        }
    }
    spans
}

/// Capitalized multi-word sequences, deduplicated, capped at 20.
/// Deliberately simple; real entity analysis lives outside this pipeline.
fn extract_entities(text: &str) -> Vec<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PATTERN.get_or_init(|| {
        Regex::new(r"\b[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+(?:\s+(?:de|del|la|las|los|y)?\s*[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+)+\b")
            .ok()
    }) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    re.find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|e| seen.insert(e.clone()))
        .take(20)
        .collect()
}
