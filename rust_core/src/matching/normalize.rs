//! Name normalization.
//!
//! Turns a raw name from any source into a comparable form:
//! 1. decode HTML entities (`&#039;` -> `'`)
//! 2. NFD-decompose and drop combining marks (`José` -> `Jose`)
//! 3. strip apostrophes, turn hyphens into spaces
//! 4. collapse whitespace
//! 5. lowercase
//!
//! Total and pure: any input, including the empty string, yields a string.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static ENTITY_RE: OnceLock<Regex> = OnceLock::new();

fn entity_regex() -> &'static Regex {
    ENTITY_RE.get_or_init(|| {
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
            .expect("entity pattern is valid")
    })
}

fn decode_entity(entity: &str, body: &str) -> Option<String> {
    if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
    } else if let Some(dec) = body.strip_prefix('#') {
        dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
    } else {
        // Named references use the full HTML5 table
        let decoded = html_escape::decode_html_entities(entity);
        (decoded != entity).then(|| decoded.into_owned())
    }
}

/// Decode HTML character references. Unknown entities are left untouched.
///
/// Scraped sources sometimes double-encode (`&amp;#039;`), so decoding is
/// applied twice at most.
pub fn decode_html_entities(raw: &str) -> String {
    let re = entity_regex();
    let mut current = raw.to_string();
    for _ in 0..2 {
        if !current.contains('&') {
            break;
        }
        let decoded = re
            .replace_all(&current, |caps: &Captures| {
                decode_entity(&caps[0], &caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    current
}

fn is_apostrophe(c: char) -> bool {
    matches!(c, '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{02BC}' | '\u{00B4}')
}

fn is_hyphen(c: char) -> bool {
    matches!(c, '-' | '\u{2010}'..='\u{2015}' | '\u{2212}')
}

/// Canonicalize a name for comparison.
pub fn normalize(raw: &str) -> String {
    let decoded = decode_html_entities(raw);

    let mapped: String = decoded
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !is_apostrophe(*c))
        .map(|c| if is_hyphen(c) { ' ' } else { c })
        .collect();

    mapped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split a normalized name into word tokens, trimming surrounding punctuation
/// (`"m."` -> `"m"`). Empty tokens are dropped.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}
