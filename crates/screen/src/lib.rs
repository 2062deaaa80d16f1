//! Forbidden-word screening.
//!
//! A [`WordList`] is a categorized, read-only mapping of policy categories to
//! words, with a flattened lookup list derived at construction. Screening is
//! a pure function of `(text, word list)`: the text is lowercased and every
//! word is tested for literal substring containment.
//!
//! There is deliberately no word-boundary logic — a forbidden word inside a
//! longer unrelated word still matches. That trades false positives for
//! resistance to simple evasion, and the tradeoff is documented rather than
//! fixed.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Categorized forbidden-word list, static after construction.
///
/// Deserializes from a plain `category -> [words]` mapping; the flattened
/// lookup list is rebuilt on construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct WordList {
    categories: BTreeMap<String, Vec<String>>,
    flattened: Vec<String>,
}

impl From<BTreeMap<String, Vec<String>>> for WordList {
    fn from(categories: BTreeMap<String, Vec<String>>) -> Self {
        WordList::from_categories(categories)
    }
}

impl From<WordList> for BTreeMap<String, Vec<String>> {
    fn from(list: WordList) -> Self {
        list.categories
    }
}

impl WordList {
    /// Build a word list from a categorized mapping.
    pub fn from_categories(categories: BTreeMap<String, Vec<String>>) -> Self {
        let flattened = categories.values().flatten().cloned().collect();
        Self {
            categories,
            flattened,
        }
    }

    /// The built-in production list.
    pub fn builtin() -> &'static WordList {
        static BUILTIN: Lazy<WordList> = Lazy::new(|| {
            let mut categories = BTreeMap::new();
            categories.insert(
                "违法内容".to_string(),
                words(&["毒品", "走私", "犯罪", "非法", "假证", "伪造", "诈骗"]),
            );
            categories.insert(
                "违规内容".to_string(),
                words(&["黄赌毒", "赌博", "情色", "色情", "淫秽", "援交"]),
            );
            categories.insert(
                "敏感词".to_string(),
                words(&["私密", "约炮", "一夜情", "包养", "小姐", "特殊服务"]),
            );
            WordList::from_categories(categories)
        });
        &BUILTIN
    }

    /// True if `text` contains any forbidden word as a substring.
    pub fn contains_forbidden(&self, text: &str) -> bool {
        !self.find_forbidden(text).is_empty()
    }

    /// Every forbidden word found in `text`, in list order.
    ///
    /// Matching is case-insensitive on the text side only; words are treated
    /// as literal substrings.
    pub fn find_forbidden(&self, text: &str) -> Vec<&str> {
        if text.is_empty() {
            return Vec::new();
        }
        let lowered = text.to_lowercase();
        let found: Vec<&str> = self
            .flattened
            .iter()
            .filter(|word| lowered.contains(word.as_str()))
            .map(String::as_str)
            .collect();
        if !found.is_empty() {
            warn!(words = ?found, "forbidden_words_detected");
        }
        found
    }

    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.categories
    }

    /// Total number of words across all categories.
    pub fn len(&self) -> usize {
        self.flattened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened.is_empty()
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|w| w.to_string()).collect()
}
