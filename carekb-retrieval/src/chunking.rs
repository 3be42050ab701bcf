//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`SectionChunker`], the
//! structure-aware splitter used by the ingestion pipeline. Splitting
//! policy, in priority order:
//!
//! 1. A Q&A pair (question plus its answer) is atomic and is never split
//!    across chunks while it fits within the maximum chunk size.
//! 2. Splits prefer heading boundaries over mid-paragraph positions; a
//!    chunk never spans a top-level (`#`) heading boundary.
//! 3. A unit that exceeds the maximum chunk size is split on sentence
//!    boundaries, keeping an adjacent English/Chinese translation pair
//!    together as one `mixed` span.
//! 4. A document with no discernible structure falls back to a fixed-size
//!    sliding window with overlap.
//!
//! Chunk text is always raw document text. Heading context is carried in
//! [`Chunk::heading_path`] metadata, never prepended to the text, so the
//! chunks of a document concatenated in ordinal order with overlap
//! prefixes removed reconstruct the document modulo whitespace.

use tracing::debug;

use crate::config::PipelineConfig;
use crate::document::{Chunk, SourceDocument};
use crate::structure::{self, Block};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no
/// embeddings; embeddings are attached later by the pipeline. A chunk
/// that is empty after whitespace normalization is discarded, not
/// returned.
pub trait Chunker: Send + Sync {
    /// Split a document into ordered chunks covering its entire text.
    ///
    /// Returns an empty `Vec` for a document with no usable text; the
    /// pipeline logs that case as a chunking warning.
    fn chunk(&self, document: &SourceDocument) -> Vec<Chunk>;
}

/// An intermediate chunk before ids and language tags are assigned.
struct Piece {
    text: String,
    heading_path: Vec<String>,
    overlap: usize,
}

/// The structure-aware chunker used for ingestion.
#[derive(Debug, Clone)]
pub struct SectionChunker {
    max_chunk_chars: usize,
    min_chunk_chars: usize,
    chunk_overlap: usize,
}

impl SectionChunker {
    /// Create a new `SectionChunker`.
    ///
    /// # Arguments
    ///
    /// * `max_chunk_chars` — maximum characters per chunk
    /// * `min_chunk_chars` — chunks below this stay open across soft
    ///   boundaries; a final remainder may still undershoot
    /// * `chunk_overlap` — characters repeated across a split within one
    ///   oversize unit
    pub fn new(max_chunk_chars: usize, min_chunk_chars: usize, chunk_overlap: usize) -> Self {
        Self { max_chunk_chars, min_chunk_chars, chunk_overlap }
    }

    /// Create a chunker from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_chunk_chars, config.min_chunk_chars, config.chunk_overlap)
    }

    /// Accumulate structural blocks into pieces.
    fn chunk_blocks(&self, blocks: &[Block]) -> Vec<Piece> {
        fn flush(
            pieces: &mut Vec<Piece>,
            current: &mut Vec<String>,
            current_chars: &mut usize,
            path: &[String],
        ) {
            if current.is_empty() {
                return;
            }
            pieces.push(Piece {
                text: current.join("\n\n"),
                heading_path: path.to_vec(),
                overlap: 0,
            });
            current.clear();
            *current_chars = 0;
        }

        let mut pieces: Vec<Piece> = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_chars = 0usize;
        let mut current_path: Vec<String> = Vec::new();

        for block in blocks {
            let len = block.text().chars().count();
            match block {
                Block::Heading { level, title, raw } => {
                    if *level == 1
                        || current_chars >= self.min_chunk_chars
                        || len > self.max_chunk_chars
                    {
                        flush(&mut pieces, &mut current, &mut current_chars, &current_path);
                    }
                    stack.truncate(level.saturating_sub(1));
                    stack.push(title.clone());
                    if len > self.max_chunk_chars {
                        // A pathological heading line gets the same
                        // treatment as any other oversize unit.
                        for (text, overlap) in self.split_oversize_unit(raw) {
                            pieces.push(Piece { text, heading_path: stack.clone(), overlap });
                        }
                        continue;
                    }
                    if current.is_empty() {
                        current_path = stack.clone();
                    } else {
                        current_chars += 2;
                    }
                    current.push(raw.clone());
                    current_chars += len;
                }
                _ => {
                    if len > self.max_chunk_chars {
                        flush(&mut pieces, &mut current, &mut current_chars, &current_path);
                        for (text, overlap) in self.split_oversize_unit(block.text()) {
                            pieces.push(Piece { text, heading_path: stack.clone(), overlap });
                        }
                        continue;
                    }
                    if !current.is_empty() && current_chars + 2 + len > self.max_chunk_chars {
                        flush(&mut pieces, &mut current, &mut current_chars, &current_path);
                    }
                    if current.is_empty() {
                        current_path = stack.clone();
                    } else {
                        current_chars += 2;
                    }
                    current.push(block.text().to_string());
                    current_chars += len;
                }
            }
        }
        flush(&mut pieces, &mut current, &mut current_chars, &current_path);
        pieces
    }

    /// Split a single unit that exceeds the maximum chunk size on
    /// sentence and bilingual-pair boundaries, with overlap carried
    /// across the splits.
    ///
    /// Each returned pair is the piece text and the byte length of its
    /// overlap prefix.
    fn split_oversize_unit(&self, text: &str) -> Vec<(String, usize)> {
        // Sentence-sized atoms, translation pairs kept together.
        let mut atoms: Vec<String> = Vec::new();
        for unit in bilingual_units(text) {
            if unit.chars().count() <= self.max_chunk_chars {
                atoms.push(unit);
                continue;
            }
            for sentence in split_sentences(&unit) {
                if sentence.chars().count() <= self.max_chunk_chars {
                    atoms.push(sentence);
                } else {
                    for (window, _) in char_windows(&sentence, self.max_chunk_chars, 0) {
                        atoms.push(window);
                    }
                }
            }
        }

        let mut pieces: Vec<(String, usize)> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_chars = 0usize;
        let mut current_overlap = 0usize;

        for atom in atoms {
            let len = atom.chars().count();
            if !current.is_empty() && current_chars + 1 + len > self.max_chunk_chars {
                let carry = current
                    .last()
                    .filter(|t| t.chars().count() <= self.chunk_overlap)
                    .cloned();
                // A piece consisting only of its overlap carry would
                // duplicate text without contributing anything new.
                if current.len() > 1 || current_overlap == 0 {
                    pieces.push((current.join("\n"), current_overlap));
                }
                current.clear();
                current_chars = 0;
                current_overlap = 0;
                if let Some(tail) = carry {
                    current_chars = tail.chars().count();
                    current_overlap = tail.len() + 1;
                    current.push(tail);
                }
            }
            if !current.is_empty() {
                current_chars += 1;
            }
            current_chars += len;
            current.push(atom);
        }
        if !current.is_empty() && (current.len() > 1 || current_overlap == 0) {
            pieces.push((current.join("\n"), current_overlap));
        }
        pieces
    }
}

impl Chunker for SectionChunker {
    fn chunk(&self, document: &SourceDocument) -> Vec<Chunk> {
        if normalize_whitespace(&document.text).is_empty() {
            return Vec::new();
        }

        let blocks = structure::parse_blocks(&document.text);
        let has_structure = blocks
            .iter()
            .any(|b| matches!(b, Block::Heading { .. } | Block::QaPair { .. }));

        let pieces = if has_structure || blocks.len() > 1 {
            self.chunk_blocks(&blocks)
        } else {
            // One undifferentiated wall of text: fixed-size window.
            char_windows(&document.text, self.max_chunk_chars, self.chunk_overlap)
                .into_iter()
                .map(|(text, overlap)| Piece { text, heading_path: Vec::new(), overlap })
                .collect()
        };

        let mut chunks = Vec::new();
        let mut discarded = 0usize;
        for piece in pieces {
            if normalize_whitespace(&piece.text).is_empty() {
                discarded += 1;
                continue;
            }
            let ordinal = chunks.len();
            chunks.push(Chunk {
                id: format!("{}::{:04}", document.id, ordinal),
                language: structure::detect_language(&piece.text),
                text: piece.text,
                heading_path: piece.heading_path,
                ordinal,
                overlap: piece.overlap,
                document_id: document.id.clone(),
                category: document.category.clone(),
                source: document.source.clone(),
                last_updated: document.last_updated,
            });
        }
        if discarded > 0 {
            debug!(document.id = %document.id, discarded, "discarded empty chunks");
        }
        chunks
    }
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group lines into bilingual units.
///
/// An English-dominant line adjacent to a CJK-dominant line is assumed to
/// be a translation pair and kept as one unit. Pairing is inferred from
/// adjacency only; the content carries no explicit pairing markers.
fn bilingual_units(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut units = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len()
            && structure::is_cjk_line(lines[i]) != structure::is_cjk_line(lines[i + 1])
        {
            units.push(format!("{}\n{}", lines[i], lines[i + 1]));
            i += 2;
        } else {
            units.push(lines[i].to_string());
            i += 1;
        }
    }
    units
}

/// Split text into sentences, keeping terminators attached.
///
/// Handles ASCII terminators followed by whitespace and the fullwidth
/// CJK terminators, which need no trailing space.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '。' | '！' | '？' | '\n' => true,
            '.' | '!' | '?' => chars.peek().is_none_or(|n| n.is_whitespace()),
            _ => false,
        };
        if boundary {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Fixed-size sliding window over characters with overlap.
///
/// Returns pieces paired with the byte length of each overlap prefix.
/// Slicing is char-boundary safe for CJK text.
fn char_windows(text: &str, window_chars: usize, overlap_chars: usize) -> Vec<(String, usize)> {
    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let total = offsets.len();
    if total == 0 {
        return Vec::new();
    }
    let step = window_chars.saturating_sub(overlap_chars).max(1);
    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window_chars).min(total);
        let byte_start = offsets[start];
        let byte_end = if end < total { offsets[end] } else { text.len() };
        let overlap = if start == 0 {
            0
        } else {
            let ov_end = (start + overlap_chars).min(end);
            let ov_byte_end = if ov_end < total { offsets[ov_end] } else { text.len() };
            ov_byte_end - byte_start
        };
        out.push((text[byte_start..byte_end].to_string(), overlap));
        if end == total {
            break;
        }
        start += step;
    }
    out
}
