//! Lexical normalization for French/English support text.
//!
//! Accent folding plus a light French suffix stemmer. Used by both the
//! classifier (accent-insensitive phrase matching) and the retrieval
//! engine (stem-overlap scoring). Deterministic by construction.

/// French suffixes stripped by [`stem`], longest first. A suffix is only
/// stripped when enough of the token remains to stay distinctive.
const FR_SUFFIXES: &[&str] = &[
    "ations", "ation", "tions", "tion", "ements", "ement", "ments", "ment", "ees", "es", "ee",
    "e", "er", "re", "s",
];

/// Fold a single character to its unaccented lowercase base.
fn fold_char(c: char) -> char {
    // Multi-char lowercase expansions are rare in our corpora; the first
    // char is enough.
    let lower = c.to_lowercase().next().unwrap_or(c);
    match lower {
        'à' | 'â' | 'ä' | 'á' | 'ã' => 'a',
        'ç' => 'c',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'î' | 'ï' | 'í' | 'ì' => 'i',
        'ô' | 'ö' | 'ó' | 'ò' => 'o',
        'ù' | 'û' | 'ü' | 'ú' => 'u',
        'ÿ' => 'y',
        other => other,
    }
}

/// Lowercase and strip accents. `Bloqué` → `bloque`.
pub fn normalize(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

/// Split normalized text into alphanumeric tokens.
pub fn tokenize(s: &str) -> Vec<String> {
    normalize(s)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Light French stemmer over a normalized token: strip the first matching
/// suffix, keeping at least `suffix len + 2` leading characters.
/// `reinitialisation` → `reinitialis`, `bloquee` → `bloqu`.
pub fn stem(token: &str) -> String {
    for suffix in FR_SUFFIXES {
        if token.len() > suffix.len() + 2
            && let Some(stripped) = token.strip_suffix(suffix)
        {
            return stripped.to_string();
        }
    }
    token.to_string()
}
