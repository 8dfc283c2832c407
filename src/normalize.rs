//! Normalization of artist and album names for matching.
//!
//! `normalize` produces the comparison key used everywhere else: the dataset
//! index is keyed by it, the similarity metric runs over it, and the match
//! cache is keyed by it. It must stay idempotent; run the tests after changes.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Leading articles dropped when they form a separate first token.
pub const LEADING_ARTICLES: [&str; 3] = ["the", "a", "an"];

/// Trailing article in catalogue form: "Beatles, The", "Scorpions, the"
pub static TRAILING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*,\s*(?:the|a|an)\s*$").unwrap());

/// Bracketed group anywhere in the name: "Кино [Kino]"
pub static BRACKET_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\[([^\]]*)\]\s*").unwrap());

/// Parenthesized group anywhere in the name: "Abbey Road (Remastered)"
pub static PAREN_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(([^)]*)\)\s*").unwrap());

/// Volume/series number before a colon: "Series 14: Title" → "Series: Title"
pub static VOLUME_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\s*:\s*").unwrap());

/// Multi-artist separator pattern for extracting the primary credited artist.
/// Matches: &, /, ,, •, +, ×, x, vs, and, with, feat, ft
pub static ARTIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:[&/,•+×]|(?:\s+(?:x|vs\.?|and|with|feat\.?|ft\.?)\s+))\s*").unwrap()
});

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Beyoncé" → "beyonce", "Sigur Rós" → "sigur ros"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    // Transliterate whatever is left (Cyrillic, Hebrew, CJK, ...)
    any_ascii(&stripped).to_lowercase()
}

/// Straighten curly quotes and spell out a standalone ampersand.
pub fn normalize_punctuation(s: &str) -> String {
    s.replace(['\u{2018}', '\u{2019}', '\u{00B4}', '\u{0060}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(" & ", " and ")
}

/// Drop leading article tokens while at least one other token remains.
/// "the the" keeps one "the", so the result is stable under re-application.
fn strip_leading_articles(mut tokens: Vec<&str>) -> Vec<&str> {
    while tokens.len() > 1 && LEADING_ARTICLES.contains(&tokens[0]) {
        tokens.remove(0);
    }
    tokens
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Canonical comparison key for an artist or album name.
///
/// Steps: trailing catalogue article removal, punctuation straightening,
/// NFKD decomposition with diacritic stripping, ASCII transliteration, case
/// folding, replacement of every non-alphanumeric character by a space (an
/// apostrophe is dropped so "Don't" keys as "dont"), whitespace collapse, and
/// finally leading-article removal on the resulting tokens.
///
/// Articles are removed after punctuation so that "The, Beatles" and
/// "The Beatles" agree and a second pass never finds a new leading article.
/// Total: input that folds to nothing yields the empty key.
pub fn normalize(raw: &str) -> String {
    let without_trailing = TRAILING_ARTICLE.replace(raw, "");
    let folded = fold_to_ascii(&normalize_punctuation(&without_trailing));

    let mut cleaned = String::with_capacity(folded.len());
    for ch in folded.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch);
        } else if ch != '\'' {
            cleaned.push(' ');
        }
    }

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    strip_leading_articles(tokens).join(" ")
}

// ============================================================================
// NAME VARIATIONS
// ============================================================================

fn push_unique(out: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
        out.push(trimmed.to_string());
    }
}

/// Raw spellings a name may be listed under: the name itself, the name with
/// bracketed/parenthesized groups removed, and bracketed contents as an
/// alternate name ("Кино [Kino]" → "Кино", "Kino").
pub fn name_variations(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    push_unique(&mut out, name);
    push_unique(&mut out, &BRACKET_GROUP.replace_all(name, " "));
    push_unique(&mut out, &PAREN_GROUP.replace_all(name, " "));
    for caps in BRACKET_GROUP.captures_iter(name) {
        push_unique(&mut out, &caps[1]);
    }
    out
}

/// Extract the primary (first) artist from a multi-artist credit.
/// Returns None if no separator is found or the primary part is too short.
/// e.g., "Mustard, Migos" → Some("Mustard"), "Beatles" → None
pub fn extract_primary_artist(artist: &str) -> Option<String> {
    let m = ARTIST_SEPARATOR.find(artist)?;
    let primary = artist[..m.start()].trim();
    (primary.chars().count() >= 2).then(|| primary.to_string())
}

/// Normalize every variation and dedupe, keeping order.
/// The first entry is always `normalize(name)`, even when empty.
fn keys_from(name: &str, variations: Vec<String>) -> Vec<String> {
    let mut keys = vec![normalize(name)];
    for variation in variations {
        let key = normalize(&variation);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Normalized keys an artist name can match under, primary key first.
pub fn artist_keys(artist: &str) -> Vec<String> {
    let mut variations = name_variations(artist);
    // Parenthesized aliases: "坂本龍一 (Ryuichi Sakamoto)"
    for caps in PAREN_GROUP.captures_iter(artist) {
        variations.push(caps[1].to_string());
    }
    if let Some(primary) = extract_primary_artist(artist) {
        variations.push(primary);
    }
    keys_from(artist, variations)
}

/// Normalized keys an album title can match under, primary key first.
pub fn title_keys(title: &str) -> Vec<String> {
    let mut variations = name_variations(title);
    let without_volume = VOLUME_NUMBER.replace_all(title, ": ");
    if without_volume != title {
        variations.push(without_volume.into_owned());
    }
    keys_from(title, variations)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("The Beatles"), "beatles");
        assert_eq!(normalize("Beatles, The"), "beatles");
        assert_eq!(normalize("  Abbey   Road "), "abbey road");
        assert_eq!(normalize("OK Computer"), "ok computer");
    }

    #[test]
    fn test_normalize_diacritics_and_case() {
        assert_eq!(normalize("Björk"), "bjork");
        assert_eq!(normalize("Sigur Rós"), "sigur ros");
        assert_eq!(normalize("MOTÖRHEAD"), "motorhead");
        assert_eq!(normalize("Beyoncé"), "beyonce");
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize("Guns N' Roses"), "guns n roses");
        assert_eq!(normalize("Don\u{2019}t Stop"), "dont stop");
        assert_eq!(normalize("Simon & Garfunkel"), "simon and garfunkel");
        assert_eq!(normalize("Sgt. Pepper's Lonely Hearts Club Band"), "sgt peppers lonely hearts club band");
        assert_eq!(normalize("AC/DC"), "ac dc");
    }

    #[test]
    fn test_normalize_articles() {
        assert_eq!(normalize("A Tribe Called Quest"), "tribe called quest");
        assert_eq!(normalize("An Awesome Wave"), "awesome wave");
        // Article alone is not stripped to nothing
        assert_eq!(normalize("The"), "the");
        assert_eq!(normalize("The The"), "the");
        // Articles inside the name are kept
        assert_eq!(normalize("Rage Against the Machine"), "rage against the machine");
        // Article glued to punctuation is still a separate token
        assert_eq!(normalize("The-Beatles"), "beatles");
    }

    #[test]
    fn test_normalize_degrades_to_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!!"), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        let samples = [
            "The Beatles",
            "the the",
            "A An The X",
            "Beatles, The",
            "Кино",
            "Sigur Rós - ( )",
            "Ｆｕｌｌｗｉｄｔｈ ＆ Co",
            "!!!",
            "Guns N' Roses",
            "The, A",
            "東京事変",
            "an",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_name_variations() {
        assert_eq!(name_variations("Кино [Kino]"), vec!["Кино [Kino]", "Кино", "Kino"]);
        assert_eq!(
            name_variations("Abbey Road (Remastered)"),
            vec!["Abbey Road (Remastered)", "Abbey Road"]
        );
        assert_eq!(name_variations("Plain"), vec!["Plain"]);
    }

    #[test]
    fn test_artist_keys() {
        assert_eq!(artist_keys("The Beatles"), vec!["beatles"]);
        assert_eq!(artist_keys("Кино [Kino]"), vec!["kino kino", "kino"]);
        assert_eq!(artist_keys("Mustard, Migos"), vec!["mustard migos", "mustard"]);
        assert_eq!(artist_keys("!!!"), vec![""]);
    }

    #[test]
    fn test_title_keys_volume() {
        let keys = title_keys("Series 14: Title");
        assert_eq!(keys[0], "series 14 title");
        assert!(keys.contains(&"series title".to_string()));
    }

    #[test]
    fn test_extract_primary_artist() {
        assert_eq!(extract_primary_artist("Mustard, Migos"), Some("Mustard".to_string()));
        assert_eq!(extract_primary_artist("Beatles"), None);
        assert_eq!(extract_primary_artist("dj snake x lil jon"), Some("dj snake".to_string()));
        assert_eq!(extract_primary_artist("Drake feat. Rihanna"), Some("Drake".to_string()));
        assert_eq!(extract_primary_artist("artist1/artist2"), Some("artist1".to_string()));
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Björk"), "bjork");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
    }
}
