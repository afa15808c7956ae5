//! Distance taxonomy: km <-> race label mapping, snapping, and finish-keyword
//! detection (C2).

use once_cell::sync::Lazy;
use regex::Regex;

/// Standard race distances in km, per SPEC_FULL.md Glossary.
pub const STANDARD_DISTANCES: [f64; 7] = [5.0, 10.0, 21.1, 42.2, 50.0, 100.0, 109.0];

const SNAP_EPSILON_KM: f64 = 0.6;

/// Raw keyword-extraction values; deliberately distinct from
/// `STANDARD_DISTANCES` — every caller must pass the result through
/// [`snap_distance`] before storing it (SPEC_FULL.md §9).
const FULL_KM_RAW: f64 = 42.1;
const HALF_KM_RAW: f64 = 21.0;

static KM_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:km|k)\b").expect("valid regex")
});

const FINISH_KEYWORDS_KO: [&str; 5] = ["도착", "완주", "골인", "결승", "피니시"];
const FINISH_KEYWORDS_EN: [&str; 4] = ["finish", "goal", "completed", "end"];

/// Snap `d` to the nearest [`STANDARD_DISTANCES`] entry if within
/// [`SNAP_EPSILON_KM`]; otherwise return `d` unchanged.
#[must_use]
pub fn snap_distance(d: f64) -> f64 {
    STANDARD_DISTANCES
        .iter()
        .copied()
        .map(|s| (s, (s - d).abs()))
        .filter(|(_, diff)| *diff <= SNAP_EPSILON_KM)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(d, |(s, _)| s)
}

/// Strip zero-width characters and NBSP, collapse internal whitespace.
#[must_use]
pub fn clean_text(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|&c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract a km value from a `point_label`-shaped string, e.g. `"5.0km"` ->
/// `5.0`. Returns `None` if no `<number>(km|k)` pattern is present.
#[must_use]
pub fn km_from_label(label: &str) -> Option<f64> {
    KM_RX.captures(label)?.get(1)?.as_str().parse().ok()
}

/// Raw (pre-snap) distance extracted from free text by keyword priority:
/// Full/Half keywords before a generic `<number>km` pattern.
#[must_use]
pub fn extract_distance_from_text(text: &str) -> Option<f64> {
    let cleaned = clean_text(text);
    let lower = cleaned.to_lowercase();
    if lower.contains("full") || cleaned.contains("풀코스") || cleaned.contains("풀마라톤") {
        return Some(FULL_KM_RAW);
    }
    if lower.contains("half") || cleaned.contains("하프") {
        return Some(HALF_KM_RAW);
    }
    km_from_label(&cleaned)
}

/// Human-readable race label for a (already snapped) distance in km.
#[must_use]
pub fn category_from_km(km: f64) -> &'static str {
    if (km - 42.2).abs() <= 0.5 {
        "Full"
    } else if (km - 21.1).abs() <= 0.4 {
        "Half"
    } else if (km - 10.0).abs() <= 0.3 {
        "10K"
    } else if (km - 5.0).abs() <= 0.25 {
        "5K"
    } else if (km - 50.0).abs() <= 1.0 {
        "50K"
    } else if (km - 100.0).abs() <= 1.0 {
        "100K"
    } else {
        "Other"
    }
}

/// True if `label`, after cleanup, contains a finish keyword (Korean raw-text
/// substring or English lowercase substring).
#[must_use]
pub fn is_finish_label(label: &str) -> bool {
    let cleaned = clean_text(label);
    let lower = cleaned.to_lowercase();
    FINISH_KEYWORDS_KO.iter().any(|kw| cleaned.contains(kw))
        || FINISH_KEYWORDS_EN.iter().any(|kw| lower.contains(kw))
}

/// Tolerance (km) for finish-distance matching, indexed by the *snapped*
/// total distance, per SPEC_FULL.md §3.
#[must_use]
pub fn finish_tolerance_for(total_km: f64) -> f64 {
    if total_km < 5.0 {
        0.4
    } else if total_km < 10.0 {
        0.6
    } else if total_km < 15.0 {
        1.0
    } else if total_km < 20.0 {
        0.8
    } else if total_km < 40.0 {
        0.8
    } else {
        3.0
    }
}
