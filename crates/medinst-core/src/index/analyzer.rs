//! Text analysis for the search index.
//!
//! Turns free text into normalized tokens: split on word boundaries, fold
//! case, drop stop words, stem. The same analyzer serves both sides of a
//! lookup, so an index and a query built from the same words always agree.

use crate::config::AnalyzerLimits;
use crate::error::{MedinstError, Result};
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

/// English stop words (the PostgreSQL `english.stop` list).
const ENGLISH_STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now",
];

static DEFAULT_ANALYZER: LazyLock<SearchAnalyzer> =
    LazyLock::new(|| SearchAnalyzer::new(Language::English));

/// Analyzer language. Only English is configured today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    English,
}

impl Language {
    fn stemmer_algorithm(self) -> Algorithm {
        match self {
            Language::English => Algorithm::English,
        }
    }

    fn stop_words(self) -> &'static [&'static str] {
        match self {
            Language::English => ENGLISH_STOP_WORDS,
        }
    }
}

/// Derived token → position map for one record.
///
/// Positions are 1-based word offsets across `name` then `country`. Equality
/// and serialization are independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchIndex(BTreeMap<String, Vec<u32>>);

impl SearchIndex {
    /// The token set, in sorted order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains_key(token)
    }

    pub fn positions(&self, token: &str) -> Option<&[u32]> {
        self.0.get(token).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn push(&mut self, token: String, position: u32) {
        let positions = self.0.entry(token).or_default();
        if positions.last() != Some(&position) {
            positions.push(position);
        }
    }
}

/// Renders in the familiar tsvector form: `'hospit':3 'mari':2`.
impl std::fmt::Display for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (token, positions)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let positions: Vec<String> = positions.iter().map(u32::to_string).collect();
            write!(f, "'{}':{}", token, positions.join(","))?;
        }
        Ok(())
    }
}

/// Tokenizer, stop-word filter and stemmer with a fixed configuration.
pub struct SearchAnalyzer {
    language: Language,
    stemmer: Stemmer,
    stop_words: HashSet<&'static str>,
}

impl std::fmt::Debug for SearchAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAnalyzer")
            .field("language", &self.language)
            .field("stop_words", &self.stop_words.len())
            .finish()
    }
}

impl Default for SearchAnalyzer {
    fn default() -> Self {
        Self::new(Language::default())
    }
}

impl SearchAnalyzer {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            stemmer: Stemmer::create(language.stemmer_algorithm()),
            stop_words: language.stop_words().iter().copied().collect(),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Build the search index for a record from its current `name` and
    /// `country`. Absent fields count as empty.
    pub fn derive(&self, name: Option<&str>, country: Option<&str>) -> Result<SearchIndex> {
        let mut index = SearchIndex::default();
        let mut position = 0u32;

        // Each field is tokenized on its own so no token spans the boundary.
        for (field, text) in [("name", name), ("country", country)] {
            let text = text.unwrap_or_default();
            check_input(field, text)?;
            for word in split_words(text) {
                position = position.saturating_add(1);
                if let Some(token) = self.normalize(&word) {
                    index.push(token, position.min(AnalyzerLimits::MAX_POSITION));
                }
            }
        }

        let size = index.to_json()?.len();
        if size > AnalyzerLimits::MAX_INDEX_BYTES {
            return Err(MedinstError::DerivationFailure {
                field: "name/country".to_string(),
                message: format!(
                    "search index is {} bytes, limit is {}",
                    size,
                    AnalyzerLimits::MAX_INDEX_BYTES
                ),
            });
        }

        Ok(index)
    }

    /// Tokens for a lookup, deduplicated in first-seen order.
    pub fn query_tokens(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        split_words(text)
            .into_iter()
            .filter_map(|word| self.normalize(&word))
            .filter(|token| seen.insert(token.clone()))
            .collect()
    }

    /// Fold, filter and stem one word. `None` for stop words and words that
    /// are too long to index.
    fn normalize(&self, word: &str) -> Option<String> {
        if word.len() > AnalyzerLimits::MAX_WORD_BYTES {
            return None;
        }
        let folded = word.to_lowercase();
        if self.stop_words.contains(folded.as_str()) {
            return None;
        }
        let stemmed = self.stemmer.stem(&folded);
        let token: String = stemmed.chars().filter(|c| *c != '\'').collect();
        (!token.is_empty()).then_some(token)
    }
}

/// Derive a search index with the default English analyzer.
pub fn derive_search_index(name: Option<&str>, country: Option<&str>) -> Result<SearchIndex> {
    DEFAULT_ANALYZER.derive(name, country)
}

/// The shared default analyzer.
pub fn default_analyzer() -> &'static SearchAnalyzer {
    &DEFAULT_ANALYZER
}

fn check_input(field: &str, text: &str) -> Result<()> {
    if text.contains('\0') {
        return Err(MedinstError::DerivationFailure {
            field: field.to_string(),
            message: "text contains a NUL character".to_string(),
        });
    }
    Ok(())
}

/// Split text into words of whole grapheme clusters.
///
/// A cluster belongs to a word when its base character is alphanumeric or an
/// apostrophe, so combining marks (vowel signs, viramas, accents) stay inside
/// the word they modify. Curly apostrophes are folded to `'` and apostrophes
/// are trimmed from the edges of each word.
fn split_words(text: &str) -> Vec<String> {
    let text = text.replace('\u{2019}', "'");
    let mut words = Vec::new();
    let mut current = String::new();

    for grapheme in text.graphemes(true) {
        let in_word = grapheme
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '\'');
        if in_word {
            current.push_str(grapheme);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .into_iter()
        .map(|word| word.trim_matches('\'').to_string())
        .filter(|word| !word.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(index: &SearchIndex) -> Vec<&str> {
        index.tokens().collect()
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive_search_index(Some("St. Mary's Hospital"), Some("USA")).unwrap();
        let b = derive_search_index(Some("St. Mary's Hospital"), Some("USA")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_derive_covers_meaningful_words() {
        let index = derive_search_index(Some("St. Mary's Hospital"), Some("USA")).unwrap();
        assert_eq!(index.len(), 4);
        assert!(index.contains("st"));
        assert!(index.contains("usa"));
        // Stemmed forms are whatever the query side produces for the same word
        let analyzer = default_analyzer();
        for word in ["mary", "hospital"] {
            let token = &analyzer.query_tokens(word)[0];
            assert!(index.contains(token), "missing token for {}", word);
        }
    }

    #[test]
    fn test_stop_words_removed_but_positions_kept() {
        let index = derive_search_index(Some("The Hospital of the Good Shepherd"), None).unwrap();
        assert!(!index.contains("the"));
        assert!(!index.contains("of"));
        assert_eq!(tokens(&index), vec!["good", "hospit", "shepherd"]);
        assert_eq!(index.positions("hospit"), Some(&[2][..]));
        assert_eq!(index.positions("shepherd"), Some(&[6][..]));
    }

    #[test]
    fn test_fields_do_not_merge() {
        let index = derive_search_index(Some("Saint"), Some("Lucia")).unwrap();
        assert_eq!(index.positions("saint"), Some(&[1][..]));
        assert_eq!(index.positions("lucia"), Some(&[2][..]));
        assert!(!index.tokens().any(|t| t.contains("saintlucia")));
    }

    #[test]
    fn test_absent_fields_are_empty() {
        let index = derive_search_index(None, None).unwrap();
        assert!(index.is_empty());

        let index = derive_search_index(None, Some("Canada")).unwrap();
        assert_eq!(tokens(&index), vec!["canada"]);
        assert_eq!(index.positions("canada"), Some(&[1][..]));
    }

    #[test]
    fn test_case_folding_and_curly_apostrophe() {
        let a = derive_search_index(Some("ST. MARY’S HOSPITAL"), Some("usa")).unwrap();
        let b = derive_search_index(Some("st. mary's hospital"), Some("USA")).unwrap();
        assert_eq!(a, b);
        assert!(!a.tokens().any(|t| t.contains('\'')));
    }

    #[test]
    fn test_repeated_token_collects_positions() {
        let index = derive_search_index(Some("Children's Hospital"), Some("Hospital")).unwrap();
        assert_eq!(index.positions("hospit"), Some(&[2, 3][..]));
    }

    #[test]
    fn test_nul_character_fails() {
        let err = derive_search_index(Some("Bad\0Name"), Some("USA")).unwrap_err();
        assert!(matches!(err, MedinstError::DerivationFailure { field, .. } if field == "name"));
    }

    #[test]
    fn test_oversized_words_are_skipped() {
        let long = "a".repeat(AnalyzerLimits::MAX_WORD_BYTES + 1);
        let index = derive_search_index(Some(&format!("{} clinic", long)), None).unwrap();
        assert_eq!(tokens(&index), vec!["clinic"]);
        assert_eq!(index.positions("clinic"), Some(&[2][..]));
    }

    #[test]
    fn test_oversized_index_fails() {
        let name: Vec<String> = (0..120_000).map(|i| format!("w{}", i)).collect();
        let err = derive_search_index(Some(&name.join(" ")), None).unwrap_err();
        assert!(matches!(err, MedinstError::DerivationFailure { .. }));
    }

    #[test]
    fn test_query_tokens_dedup() {
        let analyzer = default_analyzer();
        assert_eq!(
            analyzer.query_tokens("Hospital hospitals the HOSPITAL"),
            vec!["hospit".to_string()]
        );
        assert!(analyzer.query_tokens("the of and").is_empty());
    }

    #[test]
    fn test_display_tsvector_form() {
        let index = derive_search_index(Some("Mayo Clinic"), Some("USA")).unwrap();
        assert_eq!(index.to_string(), "'clinic':2 'mayo':1 'usa':3");
    }

    #[test]
    fn test_combining_marks_stay_inside_words() {
        let index = derive_search_index(Some("सफदरजंग अस्पताल"), Some("भारत")).unwrap();
        assert_eq!(tokens(&index), vec!["अस्पताल", "भारत", "सफदरजंग"]);
        assert_eq!(index.positions("अस्पताल"), Some(&[2][..]));

        let index = derive_search_index(Some("Hôpital Pitié-Salpêtrière"), None).unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.tokens().any(|t| t.starts_with("salpêtri")));
    }

    #[test]
    fn test_json_roundtrip_preserves_index() {
        let index = derive_search_index(Some("Mayo Clinic"), Some("USA")).unwrap();
        let restored = SearchIndex::from_json(&index.to_json().unwrap()).unwrap();
        assert_eq!(index, restored);
    }
}
