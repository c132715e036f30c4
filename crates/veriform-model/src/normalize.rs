//! Deterministic normalization shared by extraction and evidence checking.
//!
//! The hallucination check compares values against quoted evidence after
//! running both through the same normalizer, so these functions must stay
//! bit-for-bit stable across the pipeline.

use std::sync::LazyLock;

use regex::Regex;

/// Normalize free text for comparison: lowercase, collapse whitespace, strip
/// punctuation except hyphens (underscores count as word characters), trim.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !(c.is_alphanumeric() || c == '-' || c == '_') {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lc in c.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

/// Strip everything but ASCII digits.
pub fn extract_digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})").unwrap());
static US_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})").unwrap());
static MONTH_NAME_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-zA-Z]+)\s*(\d{1,2}),?\s*(\d{4})").unwrap());
static DAY_MONTH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,2})\s+([a-zA-Z]+)\s+(\d{4})").unwrap());

fn month_number(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "january" | "jan" => Some(1),
        "february" | "feb" => Some(2),
        "march" | "mar" => Some(3),
        "april" | "apr" => Some(4),
        "may" => Some(5),
        "june" | "jun" => Some(6),
        "july" | "jul" => Some(7),
        "august" | "aug" => Some(8),
        "september" | "sep" => Some(9),
        "october" | "oct" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

/// Spellings of a month accepted in evidence text, short form first.
pub fn month_names(month: u32) -> &'static [&'static str] {
    match month {
        1 => &["jan", "january"],
        2 => &["feb", "february"],
        3 => &["mar", "march"],
        4 => &["apr", "april"],
        5 => &["may"],
        6 => &["jun", "june"],
        7 => &["jul", "july"],
        8 => &["aug", "august"],
        9 => &["sep", "september"],
        10 => &["oct", "october"],
        11 => &["nov", "november"],
        12 => &["dec", "december"],
        _ => &[],
    }
}

/// Normalize a date string to `YYYY-MM-DD`.
///
/// Accepts ISO (`YYYY-MM-DD`, `YYYY/MM/DD`), US order (`MM/DD/YYYY`,
/// `MM-DD-YYYY`), `Month DD, YYYY`, and `DD Month YYYY`. Returns `None` when
/// no pattern matches; calendar plausibility is the validator's job.
pub fn normalize_date(raw: &str) -> Option<String> {
    if let Some(cap) = ISO_DATE.captures(raw) {
        let (year, month, day) = (&cap[1], cap[2].parse::<u32>().ok()?, cap[3].parse::<u32>().ok()?);
        return Some(format!("{year}-{month:02}-{day:02}"));
    }

    if let Some(cap) = US_DATE.captures(raw) {
        let (month, day, year) = (cap[1].parse::<u32>().ok()?, cap[2].parse::<u32>().ok()?, &cap[3]);
        return Some(format!("{year}-{month:02}-{day:02}"));
    }

    if let Some(cap) = MONTH_NAME_DATE.captures(raw) {
        if let Some(month) = month_number(&cap[1]) {
            let (day, year) = (cap[2].parse::<u32>().ok()?, &cap[3]);
            return Some(format!("{year}-{month:02}-{day:02}"));
        }
    }

    if let Some(cap) = DAY_MONTH_DATE.captures(raw) {
        if let Some(month) = month_number(&cap[2]) {
            let (day, year) = (cap[1].parse::<u32>().ok()?, &cap[3]);
            return Some(format!("{year}-{month:02}-{day:02}"));
        }
    }

    None
}

/// Normalize a phone number to digits only.
///
/// Returns `(digits, default_country_assumed)`: a bare 10-digit number gets a
/// leading `1` and the flag set, which the validator downgrades to a warning.
pub fn normalize_phone(raw: &str) -> (String, bool) {
    let digits = extract_digits(raw);

    if digits.len() == 10 {
        (format!("1{digits}"), true)
    } else {
        // 11 digits with a leading 1 already carries a country code; other
        // lengths pass through for the validator to flag.
        (digits, false)
    }
}
