//! FTS5 query building utilities.

use regex::Regex;
use std::sync::LazyLock;

/// Anything outside a bareword needs quoting in FTS5 queries.
static FTS5_SPECIAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w]").expect("static regex is valid"));

/// FTS5 operators are only recognized in upper case; tokens are folded, but
/// quote them anyway if one ever slips through unfolded.
const FTS5_KEYWORDS: &[&str] = &["AND", "OR", "NOT", "NEAR"];

/// Escape a term for FTS5 queries.
///
/// Terms containing anything other than word characters are wrapped in quotes.
pub fn escape_fts5_term(term: &str) -> String {
    if FTS5_SPECIAL_CHARS.is_match(term) || FTS5_KEYWORDS.contains(&term) {
        // Double any existing quotes and wrap in quotes
        let escaped = term.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        term.to_string()
    }
}

/// Build an FTS5 query from normalized tokens.
///
/// Tokens are OR-ed together and matched whole (no prefix expansion):
/// - `["mari", "hospit"]` → `mari OR hospit`
/// - `["अस्पताल", "भारत"]` → `अस्पताल OR भारत`
pub fn build_fts5_query<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(escape_fts5_term)
        .collect::<Vec<_>>()
        .join(" OR ")
}
