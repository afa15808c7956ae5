//! Duration and wall-clock parsing for split timestamps (C1).
//!
//! Durations upstream come in two shapes: `H:MM:SS[.fff]` and `MM:SS[.fff]`.
//! Wall-clock points of day are plain `HH:MM:SS` with no date component, which
//! is also the source of the midnight-wrap caveat in `eta_from_clock` below
//! (see SPEC_FULL.md §9 open questions — preserved deliberately).

use chrono::{NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

static TIME_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}(:\d{2})?(\.\d+)?").expect("valid regex"));

/// True if `s` contains something that looks like a duration or clock value.
#[must_use]
pub fn looks_time(s: &str) -> bool {
    TIME_RX.is_match(s)
}

/// All time-shaped substrings found in `s`, in order of appearance.
#[must_use]
pub fn all_times(s: &str) -> Vec<String> {
    TIME_RX.find_iter(s).map(|m| m.as_str().to_string()).collect()
}

/// The first time-shaped substring found in `s`, if any.
#[must_use]
pub fn first_time(s: &str) -> Option<String> {
    TIME_RX.find(s).map(|m| m.as_str().to_string())
}

/// Parse `H:MM:SS[.fff]` or `MM:SS[.fff]` into whole seconds, rounding to the
/// nearest second. Returns `None` if the string isn't time-shaped.
#[must_use]
pub fn sec_from_mmss(s: &str) -> Option<i64> {
    let s = s.trim();
    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        3 => {
            let h: f64 = parts[0].parse().ok()?;
            let m: f64 = parts[1].parse().ok()?;
            let sec: f64 = parts[2].parse().ok()?;
            Some((h * 3600.0 + m * 60.0 + sec).round() as i64)
        }
        2 => {
            let m: f64 = parts[0].parse().ok()?;
            let sec: f64 = parts[1].parse().ok()?;
            Some((m * 60.0 + sec).round() as i64)
        }
        _ => None,
    }
}

/// Format whole seconds as `H:MM:SS` (no leading zero on the hour) when `>=`
/// one hour, else `MM:SS`. Matches the prediction service's display format.
#[must_use]
pub fn format_duration(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Format whole seconds as zero-padded `HH:MM:SS`, used for the persisted
/// `net_time` column so it sorts and parses uniformly.
#[must_use]
pub fn format_duration_hms(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Seconds-per-kilometer pace given a duration (seconds) over a distance (km).
#[must_use]
pub fn sec_per_km(delta_secs: f64, delta_km: f64) -> Option<f64> {
    if delta_km <= 0.0 {
        None
    } else {
        Some(delta_secs / delta_km)
    }
}

/// Compute a wall-clock time-of-day `delta_sec` seconds after `clock`
/// (`HH:MM:SS`). Wraps modulo 24h with no date carry, matching the upstream
/// behavior called out in SPEC_FULL.md §9: a race crossing midnight yields
/// simply the wrapped time-of-day, not a date-aware timestamp.
#[must_use]
pub fn eta_from_clock(clock: &str, delta_sec: i64) -> Option<String> {
    let base = NaiveTime::parse_from_str(clock.trim(), "%H:%M:%S").ok()?;
    let base_secs = i64::from(base.hour()) * 3600 + i64::from(base.minute()) * 60 + i64::from(base.second());
    let wrapped = (base_secs + delta_sec).rem_euclid(86_400) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(wrapped, 0).map(|t| t.format("%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_time_detects_durations_and_clocks() {
        assert!(looks_time("01:45:00"));
        assert!(looks_time("45:00"));
        assert!(!looks_time("Finish"));
    }

    #[test]
    fn sec_from_mmss_handles_both_forms() {
        assert_eq!(sec_from_mmss("01:45:00"), Some(6300));
        assert_eq!(sec_from_mmss("45:00"), Some(2700));
        assert_eq!(sec_from_mmss("05:06.5"), Some(306));
        assert_eq!(sec_from_mmss("not a time"), None);
    }

    #[test]
    fn round_trip_duration_format_and_parse() {
        for s in ["1:45:00", "45:00", "0:05:06"] {
            let secs = sec_from_mmss(s).expect("parses");
            let formatted = format_duration(secs);
            assert_eq!(sec_from_mmss(&formatted), Some(secs));
        }
    }

    #[test]
    fn eta_from_clock_wraps_past_midnight() {
        assert_eq!(eta_from_clock("23:58:00", 240).as_deref(), Some("00:02:00"));
    }

    #[test]
    fn eta_from_clock_ordinary_addition() {
        assert_eq!(eta_from_clock("09:25:00", 1560).as_deref(), Some("09:51:00"));
    }

    #[test]
    fn first_time_picks_leftmost_match() {
        assert_eq!(
            first_time("00:25:30 (09:25:30)").as_deref(),
            Some("00:25:30")
        );
    }

    #[test]
    fn all_times_finds_both_clock_and_net() {
        let times = all_times("00:25:30 (09:25:30)");
        assert_eq!(times, vec!["00:25:30", "09:25:30"]);
    }
}
