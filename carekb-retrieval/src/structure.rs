//! Structural model for heterogeneous markdown documents.
//!
//! Source documents use varying heading conventions and Q&A markers. A
//! detection pass turns raw text into a sequence of [`Block`]s so the
//! chunker's splitting policy operates on structure, not on string
//! heuristics scattered through it.

use std::sync::LazyLock;

use regex::Regex;

use crate::document::Language;

/// A question marker at the start of a line: `Q:`, `Question:`, `問：`,
/// `問題：` and simplified variants, with ASCII or fullwidth colon.
static QUESTION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:q|question|問題?|问题?)\s*[::.]").unwrap());

/// An answer marker at the start of a line: `A:`, `Answer:`, `答：`,
/// `答案：`, `回答：` and variants.
static ANSWER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:a|answer|答案?|回答)\s*[::.]").unwrap());

/// A structural unit of a source document.
///
/// Every variant carries the raw text of its span, markers included, so a
/// chunk assembled from blocks reproduces the document text verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// A markdown heading line.
    Heading {
        /// Heading level: number of leading `#` characters.
        level: usize,
        /// The heading title without the `#` markers.
        title: String,
        /// The raw heading line.
        raw: String,
    },
    /// A question and its answer. Atomic: the chunker never splits inside
    /// one.
    QaPair {
        /// The raw question-plus-answer span.
        raw: String,
    },
    /// A run of prose lines.
    Paragraph {
        /// The raw paragraph text.
        raw: String,
    },
    /// Consecutive `|`-delimited markdown table lines.
    Table {
        /// The raw table text.
        raw: String,
    },
}

impl Block {
    /// The raw text of this block.
    pub fn text(&self) -> &str {
        match self {
            Block::Heading { raw, .. }
            | Block::QaPair { raw }
            | Block::Paragraph { raw }
            | Block::Table { raw } => raw,
        }
    }
}

/// Parse document text into a sequence of structural blocks.
///
/// Lines are consumed in order; blank lines terminate paragraphs and
/// tables. A question marker opens a [`Block::QaPair`] that extends
/// through its answer until the next question marker, heading, or table.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(&line) = lines.peek() {
        let trimmed = line.trim_start();

        if trimmed.is_empty() {
            lines.next();
            continue;
        }

        if trimmed.starts_with('#') {
            let level = trimmed.chars().take_while(|c| *c == '#').count();
            let title = trimmed[level..].trim().to_string();
            blocks.push(Block::Heading { level, title, raw: line.trim_end().to_string() });
            lines.next();
            continue;
        }

        if QUESTION_MARKER.is_match(trimmed) {
            let mut span = vec![line.trim_end()];
            lines.next();
            let mut seen_answer = false;
            while let Some(&next) = lines.peek() {
                let t = next.trim_start();
                if t.starts_with('#') || QUESTION_MARKER.is_match(t) || t.starts_with('|') {
                    break;
                }
                if ANSWER_MARKER.is_match(t) {
                    seen_answer = true;
                } else if t.is_empty() && seen_answer {
                    // A blank line after the answer ends the pair.
                    break;
                }
                span.push(next.trim_end());
                lines.next();
            }
            while span.last().is_some_and(|l| l.is_empty()) {
                span.pop();
            }
            blocks.push(Block::QaPair { raw: span.join("\n") });
            continue;
        }

        if trimmed.starts_with('|') {
            let mut span = Vec::new();
            while let Some(&next) = lines.peek() {
                if !next.trim_start().starts_with('|') {
                    break;
                }
                span.push(next.trim_end());
                lines.next();
            }
            blocks.push(Block::Table { raw: span.join("\n") });
            continue;
        }

        // Paragraph: prose lines up to the next blank line or structure.
        let mut span = Vec::new();
        while let Some(&next) = lines.peek() {
            let t = next.trim_start();
            if t.is_empty()
                || t.starts_with('#')
                || t.starts_with('|')
                || QUESTION_MARKER.is_match(t)
            {
                break;
            }
            span.push(next.trim_end());
            lines.next();
        }
        blocks.push(Block::Paragraph { raw: span.join("\n") });
    }

    blocks
}

/// Whether a character is a CJK ideograph.
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'        // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'      // Extension A
        | '\u{F900}'..='\u{FAFF}'      // Compatibility Ideographs
        | '\u{3000}'..='\u{303F}'      // CJK punctuation
        | '\u{FF01}'..='\u{FF5E}'      // Fullwidth forms
    )
}

/// Whether a line's letter content is predominantly CJK.
pub fn is_cjk_line(line: &str) -> bool {
    let cjk = line.chars().filter(|c| is_cjk(*c)).count();
    let latin = line.chars().filter(|c| c.is_ascii_alphabetic()).count();
    cjk > 0 && cjk >= latin
}

/// Detect the language of a span of text.
///
/// Classification is by the share of CJK ideographs among letter
/// characters: predominantly CJK is `zh-Hant` (the content base carries
/// Traditional Chinese only), predominantly Latin is `en`, and anything
/// with a substantial share of both is `mixed`.
pub fn detect_language(text: &str) -> Language {
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let latin = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let letters = cjk + latin;
    if letters == 0 {
        return Language::En;
    }
    let cjk_share = cjk as f32 / letters as f32;
    if cjk_share >= 0.9 {
        Language::ZhHant
    } else if cjk_share <= 0.1 {
        Language::En
    } else {
        Language::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headings_with_levels() {
        let blocks = parse_blocks("# Title\n\n## Section\nBody text.");
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], Block::Heading { level: 1, .. }));
        assert!(matches!(&blocks[1], Block::Heading { level: 2, .. }));
        assert!(matches!(&blocks[2], Block::Paragraph { .. }));
    }

    #[test]
    fn qa_pair_spans_question_and_answer() {
        let text = "Q: Can my child eat before the procedure?\n\
                    A: No. Stop solid food six hours before.\n\
                    Clear fluids are allowed until two hours before.\n\n\
                    Q: How long does it take?\nA: About an hour.";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 2);
        let Block::QaPair { raw } = &blocks[0] else {
            panic!("expected QaPair, got {:?}", blocks[0]);
        };
        assert!(raw.contains("eat before"));
        assert!(raw.contains("Clear fluids"));
        assert!(!raw.contains("How long"));
    }

    #[test]
    fn recognizes_chinese_qa_markers() {
        let blocks = parse_blocks("問：手術前可以進食嗎？\n答：不可以。");
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], Block::QaPair { .. }));
    }

    #[test]
    fn groups_table_lines() {
        let text = "| Age | Fasting time |\n|---|---|\n| 0-6 m | 4 h |\n\nAfter.";
        let blocks = parse_blocks(text);
        assert!(matches!(&blocks[0], Block::Table { .. }));
        assert!(matches!(&blocks[1], Block::Paragraph { .. }));
    }

    #[test]
    fn detects_language_by_script_share() {
        assert_eq!(detect_language("Your child must fast before sedation."), Language::En);
        assert_eq!(detect_language("鎮靜前您的孩子必須禁食。"), Language::ZhHant);
        assert_eq!(
            detect_language("Your child must fast. 您的孩子必須禁食。"),
            Language::Mixed
        );
    }

    #[test]
    fn empty_text_defaults_to_english() {
        assert_eq!(detect_language("  \n "), Language::En);
    }
}
