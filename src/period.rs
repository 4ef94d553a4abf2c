//! Heuristic normalization of arbitrary textual period representations into
//! canonical calendar months.
//!
//! The cascade tries an ordered list of extractors and takes the first one
//! that yields a valid month; unrecognized input is `None`, never an error.
//! Callers decide whether a missing period is fatal for their batch.

use crate::schema::CanonicalPeriod;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

lazy_static! {
    // 1. ISO-like YYYY-MM or YYYY-MM-DD, separators - or /.
    static ref ISO: Regex = Regex::new(r"^(\d{4})[-/](\d{1,2})(?:[-/]\d{1,2})?$").unwrap();
    // 2. MM-YYYY or MM-DD-YYYY, separators - or /; two-digit years allowed.
    static ref MONTH_FIRST: Regex =
        Regex::new(r"^(\d{1,2})[-/](?:(\d{1,2})[-/])?(\d{4}|\d{2})$").unwrap();
    // 3. MM.YY with a two-digit year.
    static ref DOTTED: Regex = Regex::new(r"^(\d{1,2})\.(\d{2})$").unwrap();
    // 4. Compact YYYYMM.
    static ref COMPACT: Regex = Regex::new(r"^(\d{4})(\d{2})$").unwrap();
    // 5. Named month + 2-or-4-digit year: Jan'24, January 2024, Jan-24.
    static ref NAMED: Regex =
        Regex::new(r"(?i)^([a-z]{3,9})[\s\-']+(\d{4}|\d{2})$").unwrap();
    // 6. Compact named YYYY M MM: 2024 M08, 2024M8.
    static ref YEAR_M: Regex = Regex::new(r"(?i)^(\d{4})\s*M(\d{1,2})$").unwrap();
    // Exact shape of a period at rest.
    static ref NORMALIZED: Regex = Regex::new(r"^\d{4}-(0[1-9]|1[0-2])-01$").unwrap();
    static ref MONTH_NAMES: HashMap<&'static str, u32> = {
        let mut m = HashMap::new();
        let names: [(&str, &str, u32); 12] = [
            ("jan", "january", 1),
            ("feb", "february", 2),
            ("mar", "march", 3),
            ("apr", "april", 4),
            ("may", "may", 5),
            ("jun", "june", 6),
            ("jul", "july", 7),
            ("aug", "august", 8),
            ("sep", "september", 9),
            ("oct", "october", 10),
            ("nov", "november", 11),
            ("dec", "december", 12),
        ];
        for (abbrev, full, number) in names {
            m.insert(abbrev, number);
            m.insert(full, number);
        }
        m.insert("sept", 9);
        m
    };
}

/// Last-resort formats for the generic date-string fallback; only the
/// year/month of a successful parse are kept.
const FALLBACK_FORMATS: [&str; 6] = [
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%m-%d-%y",
];

type Extractor = fn(&str) -> Option<CanonicalPeriod>;

/// First match wins; each extractor rejects out-of-range months so the next
/// pattern gets a chance.
const CASCADE: [Extractor; 7] = [
    match_iso,
    match_month_first,
    match_dotted,
    match_compact,
    match_named,
    match_year_m,
    match_fallback_date,
];

/// Converts arbitrary short text (column value, sheet name, file name) into
/// a canonical calendar month. Total: unrecognized input yields `None`.
pub fn normalize(text: &str) -> Option<CanonicalPeriod> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    CASCADE.iter().find_map(|extract| extract(trimmed))
}

/// `yy < 50` resolves to 2000+yy, otherwise 1900+yy.
fn pivot_two_digit_year(yy: u32) -> i32 {
    if yy < 50 {
        2000 + yy as i32
    } else {
        1900 + yy as i32
    }
}

fn match_iso(text: &str) -> Option<CanonicalPeriod> {
    let caps = ISO.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    CanonicalPeriod::from_parts(year, month)
}

fn match_month_first(text: &str) -> Option<CanonicalPeriod> {
    let caps = MONTH_FIRST.captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let digits = &caps[3];
    let year = if digits.len() == 4 {
        digits.parse::<i32>().ok()?
    } else {
        pivot_two_digit_year(digits.parse::<u32>().ok()?)
    };
    CanonicalPeriod::from_parts(year, month)
}

fn match_dotted(text: &str) -> Option<CanonicalPeriod> {
    let caps = DOTTED.captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let yy: u32 = caps[2].parse().ok()?;
    CanonicalPeriod::from_parts(pivot_two_digit_year(yy), month)
}

fn match_compact(text: &str) -> Option<CanonicalPeriod> {
    let caps = COMPACT.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    CanonicalPeriod::from_parts(year, month)
}

fn match_named(text: &str) -> Option<CanonicalPeriod> {
    let caps = NAMED.captures(text)?;
    let month = *MONTH_NAMES.get(caps[1].to_ascii_lowercase().as_str())?;
    let digits = &caps[2];
    let year = if digits.len() == 4 {
        digits.parse::<i32>().ok()?
    } else {
        pivot_two_digit_year(digits.parse::<u32>().ok()?)
    };
    CanonicalPeriod::from_parts(year, month)
}

fn match_year_m(text: &str) -> Option<CanonicalPeriod> {
    let caps = YEAR_M.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    CanonicalPeriod::from_parts(year, month)
}

fn match_fallback_date(text: &str) -> Option<CanonicalPeriod> {
    FALLBACK_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| CanonicalPeriod::from_parts(date.year(), date.month()))
    })
}

/// Scans free-form text (sheet names, file names) for a period using the
/// same pattern set, tolerant of surrounding words, parentheses, and file
/// extensions.
pub fn extract_from_free_text(text: &str) -> Option<CanonicalPeriod> {
    if let Some(period) = normalize(text) {
        return Some(period);
    }

    let tokens: Vec<&str> = text
        .split(|c: char| {
            c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | ';' | '"' | '_')
        })
        .filter(|t| !t.is_empty())
        .collect();

    for token in &tokens {
        if let Some(period) = try_token(token) {
            return Some(period);
        }
    }

    // Formats split across a space survive as adjacent tokens: "January
    // 2024", "2024 M08".
    tokens
        .windows(2)
        .find_map(|pair| normalize(&format!("{} {}", pair[0], pair[1])))
}

fn try_token(token: &str) -> Option<CanonicalPeriod> {
    if let Some(period) = normalize(token) {
        return Some(period);
    }

    // Dots either belong to an MM.YY period or to a file extension;
    // try dot-delimited pieces and adjacent pairs of pieces.
    if token.contains('.') {
        let pieces: Vec<&str> = token.split('.').filter(|p| !p.is_empty()).collect();
        for piece in &pieces {
            if let Some(period) = normalize(piece) {
                return Some(period);
            }
        }
        return pieces
            .windows(2)
            .find_map(|pair| normalize(&format!("{}.{}", pair[0], pair[1])));
    }

    None
}

/// Inspects a record's keys for a period-bearing column. Key names are
/// compared case- and punctuation-insensitively; priority is keys containing
/// "glmonth", then "period", then keys ending in "month", with a literal
/// `glMonth` field as the last fallback. The first value that normalizes
/// wins.
pub fn detect_from_row(row: &serde_json::Map<String, Value>) -> Option<CanonicalPeriod> {
    // One normalized-key index per row, not one per field access.
    let index: Vec<(String, &Value)> = row
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();

    let priorities: [fn(&str) -> bool; 3] = [
        |key| key.contains("glmonth"),
        |key| key.contains("period"),
        |key| key.ends_with("month"),
    ];

    for key_matches in priorities {
        for (key, value) in &index {
            if key_matches(key) {
                if let Some(period) = value_as_text(value).as_deref().and_then(normalize) {
                    return Some(period);
                }
            }
        }
    }

    row.get("glMonth")
        .and_then(value_as_text)
        .as_deref()
        .and_then(normalize)
}

/// Checks the exact `YYYY-MM-01` shape of a period accepted from untrusted
/// input.
pub fn is_valid_normalized_month(s: &str) -> bool {
    NORMALIZED.is_match(s)
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
