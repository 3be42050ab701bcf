//! Lexical search: bilingual tokenizer and BM25 inverted index.
//!
//! English text is tokenized into lowercased word tokens with stop words
//! removed. Chinese has no whitespace word boundaries, so CJK runs are
//! tokenized into overlapping character bigrams, the standard trick for
//! CJK keyword search. One query can therefore match both halves of a
//! bilingual chunk.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// BM25 term-frequency saturation parameter.
const BM25_K1: f32 = 1.2;
/// BM25 length-normalization parameter.
const BM25_B: f32 = 0.75;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
        // Chinese particles and pronouns, filtered as single characters
        "的", "了", "是", "在", "和", "或", "及", "與", "你", "我", "他", "她", "它", "們", "這",
        "那", "有", "會", "要", "請",
    ]
    .into_iter()
    .collect()
});

/// Whether a character belongs to a CJK ideograph run.
fn is_cjk_token_char(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Tokenize text into lexical tokens.
///
/// ASCII alphanumeric runs become lowercased word tokens (single
/// characters and stop words dropped); CJK runs become character bigrams
/// (a lone ideograph becomes a unigram unless it is a stop word).
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let mut flush_word = |word: &mut String, tokens: &mut Vec<String>| {
        if word.len() > 1 && !STOP_WORDS.contains(word.as_str()) {
            tokens.push(std::mem::take(word));
        } else {
            word.clear();
        }
    };
    let mut flush_cjk = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        match run.len() {
            0 => {}
            1 => {
                let s = run[0].to_string();
                if !STOP_WORDS.contains(s.as_str()) {
                    tokens.push(s);
                }
            }
            _ => {
                for pair in run.windows(2) {
                    tokens.push(pair.iter().collect());
                }
            }
        }
        run.clear();
    };

    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.push(c);
        } else if is_cjk_token_char(c) {
            flush_word(&mut word, &mut tokens);
            cjk_run.push(c);
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens
}

/// A single entry in a term's postings list.
#[derive(Debug, Clone)]
struct Posting {
    /// Internal slot id of the entry within the generation.
    slot: u32,
    /// Number of times the term appears in the entry.
    term_frequency: u32,
}

/// Inverted index mapping terms to postings lists, with document lengths
/// tracked for BM25 length normalization.
///
/// Slots are assigned by the owning index generation; replacing a slot's
/// tokens removes its old postings first, which keeps upserts idempotent.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    index: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    /// Occupancy per slot, tracked separately from document length so
    /// that a slot indexed with zero tokens still counts exactly once.
    occupied: Vec<bool>,
    doc_count: u32,
    total_doc_length: u64,
}

impl InvertedIndex {
    /// Create a new empty inverted index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the token list of a slot. An already-occupied slot is
    /// removed first, so re-adding never double-counts.
    pub fn add(&mut self, slot: u32, tokens: &[String]) {
        let idx = slot as usize;
        if idx >= self.occupied.len() {
            self.doc_lengths.resize(idx + 1, 0);
            self.occupied.resize(idx + 1, false);
        }
        if self.occupied[idx] {
            self.remove(slot);
        }
        self.occupied[idx] = true;
        let doc_len = tokens.len() as u32;
        self.doc_lengths[idx] = doc_len;
        self.doc_count += 1;
        self.total_doc_length += u64::from(doc_len);

        let mut tf: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *tf.entry(token.as_str()).or_insert(0) += 1;
        }
        for (term, term_frequency) in tf {
            self.index
                .entry(term.to_string())
                .or_default()
                .push(Posting { slot, term_frequency });
        }
    }

    /// Remove a slot's postings, if present.
    pub fn remove(&mut self, slot: u32) {
        let idx = slot as usize;
        if idx >= self.occupied.len() || !self.occupied[idx] {
            return;
        }
        self.occupied[idx] = false;
        let doc_len = self.doc_lengths[idx];
        self.doc_lengths[idx] = 0;
        self.doc_count -= 1;
        self.total_doc_length -= u64::from(doc_len);
        self.index.retain(|_, postings| {
            postings.retain(|p| p.slot != slot);
            !postings.is_empty()
        });
    }

    fn average_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            return 0.0;
        }
        self.total_doc_length as f32 / self.doc_count as f32
    }

    /// BM25 Okapi scoring of a query against the index.
    ///
    /// Returns `(slot, score)` pairs sorted by descending score,
    /// truncated to `k`.
    pub fn search(&self, query: &str, k: usize) -> Vec<(u32, f32)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.doc_count == 0 {
            return Vec::new();
        }

        let avgdl = self.average_doc_length();
        let n = self.doc_count as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for token in &query_tokens {
            let Some(postings) = self.index.get(token.as_str()) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for posting in postings {
                let dl = self.doc_lengths[posting.slot as usize] as f32;
                let tf = posting.term_frequency as f32;
                let tf_norm = (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl));
                *scores.entry(posting.slot).or_insert(0.0) += idf * tf_norm;
            }
        }

        let mut results: Vec<(u32, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        results.truncate(k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_english_with_stop_words_removed() {
        let tokens = tokenize("The child must fast before the procedure");
        assert_eq!(tokens, vec!["child", "must", "fast", "before", "procedure"]);
    }

    #[test]
    fn tokenizes_cjk_into_bigrams() {
        let tokens = tokenize("禁食時間");
        assert_eq!(tokens, vec!["禁食", "食時", "時間"]);
    }

    #[test]
    fn mixed_text_yields_both_token_kinds() {
        let tokens = tokenize("fasting 禁食 rules");
        assert_eq!(tokens, vec!["fasting", "禁食", "rules"]);
    }

    fn build_corpus() -> InvertedIndex {
        let mut idx = InvertedIndex::new();
        idx.add(0, &tokenize("fasting rules before sedation 禁食"));
        idx.add(1, &tokenize("parking is available at the garage"));
        idx.add(2, &tokenize("sedation recovery at home"));
        idx
    }

    #[test]
    fn empty_query_returns_nothing() {
        assert!(build_corpus().search("", 10).is_empty());
    }

    #[test]
    fn matches_rank_above_non_matches() {
        let results = build_corpus().search("fasting before sedation", 10);
        assert_eq!(results[0].0, 0);
        assert!(!results.iter().any(|(slot, _)| *slot == 1));
    }

    #[test]
    fn chinese_query_matches_bilingual_entry() {
        let results = build_corpus().search("禁食", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn reindexing_a_tokenless_slot_keeps_scores_stable() {
        let mut idx = InvertedIndex::new();
        idx.add(0, &tokenize("fasting rules before sedation"));
        idx.add(1, &[]);
        let before = idx.search("fasting", 10);
        for _ in 0..3 {
            idx.remove(1);
            idx.add(1, &[]);
        }
        assert_eq!(idx.search("fasting", 10), before);
    }

    #[test]
    fn remove_then_search_misses_the_slot() {
        let mut idx = build_corpus();
        idx.remove(0);
        assert!(idx.search("fasting", 10).is_empty());
    }
}
