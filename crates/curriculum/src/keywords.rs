//! Keyword extraction for lesson lookup.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

pub const MAX_KEYWORDS: usize = 10;

const STOPWORDS: &[&str] = &[
    // vi
    "của", "và", "các", "những", "cho", "với", "trong", "được", "một", "này", "không", "hãy",
    "giúp", "tôi", "bài", "học", "lớp", "khối", "kỳ", "kì", "về", "theo", "như", "thì", "mà",
    "cần", "phải", "nên", "rằng", "khi", "đến", "từ", "sau", "trước", "viết", "tạo", "soạn",
    "sinh", "em", "nào", "gì", "để", "hay",
    // en
    "the", "and", "for", "with", "that", "this", "from", "are", "you", "your", "please",
    "about", "into", "should", "would", "could", "will", "have", "has", "create", "write",
    "grade", "class", "semester", "lesson",
];

// Unicode-aware: covers precomposed and combining Vietnamese diacritics.
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").unwrap_or_else(|e| panic!("word pattern must compile: {e}")));

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Up to [`MAX_KEYWORDS`] distinct lowercased words, in order of first appearance.
///
/// Words of two chars or fewer, stopwords and purely numeric tokens are skipped.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for word in WORD_RE.find_iter(text) {
        let lowered = word.as_str().to_lowercase();
        if lowered.chars().count() <= 2
            || lowered.chars().all(|c| c.is_numeric())
            || is_stopword(&lowered)
        {
            continue;
        }
        if seen.insert(lowered.clone()) {
            out.push(lowered);
            if out.len() == MAX_KEYWORDS {
                break;
            }
        }
    }

    out
}
