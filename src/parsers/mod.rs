//! Canonical split schema, parser router, and label normalization (C6/C7).
//!
//! Parsers reference each other only through the registry built by
//! [`router_for`] — each parser depends solely on the canonical
//! [`ParsedResult`] shape, never on another parser's internals
//! (SPEC_FULL.md §9, "cyclic collaboration").

pub mod generic;
pub mod myresult;
pub mod smartchip;
pub mod spct;

use crate::distance;

/// One upstream-observed split point, before it is reconciled against
/// anything already stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSplit {
    pub point_label: String,
    pub point_km: Option<f64>,
    pub net_time: Option<String>,
    pub pass_clock: Option<String>,
    pub pace: Option<String>,
}

impl RawSplit {
    #[must_use]
    pub fn has_any_time(&self) -> bool {
        self.net_time.is_some() || self.pass_clock.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Certificate,
    LivePhoto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawAsset {
    pub kind: AssetKind,
    pub url: String,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total_net: Option<String>,
    pub start_time: Option<String>,
    pub finish_time: Option<String>,
}

/// The five canonical keys every parser must populate, even on empty input
/// (SPEC_FULL.md §8 testable property).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResult {
    pub splits: Vec<RawSplit>,
    pub summary: Summary,
    pub assets: Vec<RawAsset>,
    pub race_label: Option<String>,
    pub race_total_km: Option<f64>,
}

/// Host-substring registry mapping to the provider that can parse it.
/// Built once at lookup time (cheap: three entries); falls back to the
/// generic table extractor when no host matches.
#[must_use]
pub fn parse_for_host(host: &str, body: &str) -> ParsedResult {
    let host = host.to_lowercase();
    let mut result = if host.contains("smartchip.co.kr") {
        smartchip::parse(body)
    } else if host.contains("spct.co.kr") {
        spct::parse(body)
    } else if host.contains("myresult.co.kr") {
        myresult::parse(body)
    } else {
        generic::parse(body)
    };
    normalize_labels(&mut result);
    result
}

/// Finish-label promotion: if the last split isn't already a finish label,
/// promote it to `Finish` when its distance is close enough to the total
/// (SPEC_FULL.md §4.5). Idempotent by construction: re-running it on an
/// already-normalized set changes nothing because the last label is already
/// `Finish` or fails both distance checks the same way.
pub fn normalize_labels(result: &mut ParsedResult) {
    let total_km = result.race_total_km;
    if let Some(last) = result.splits.last_mut() {
        if !distance::is_finish_label(&last.point_label) {
            let promote = match (last.point_km, total_km) {
                (Some(km), Some(total)) => km >= total - 1.0,
                (Some(km), None) => (41.5..=43.0).contains(&km),
                (None, _) => false,
            };
            if promote {
                last.point_label = "Finish".to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(label: &str, km: Option<f64>) -> RawSplit {
        RawSplit {
            point_label: label.to_string(),
            point_km: km,
            net_time: Some("01:00:00".to_string()),
            pass_clock: None,
            pace: None,
        }
    }

    #[test]
    fn promotes_last_split_when_within_one_km_of_known_total() {
        let mut result = ParsedResult {
            splits: vec![split("21.0km", Some(21.0))],
            race_total_km: Some(21.1),
            ..Default::default()
        };
        normalize_labels(&mut result);
        assert_eq!(result.splits[0].point_label, "Finish");
    }

    #[test]
    fn does_not_promote_when_far_from_total() {
        let mut result = ParsedResult {
            splits: vec![split("10.0km", Some(10.0))],
            race_total_km: Some(21.1),
            ..Default::default()
        };
        normalize_labels(&mut result);
        assert_eq!(result.splits[0].point_label, "10.0km");
    }

    #[test]
    fn promotes_within_marathon_window_when_total_unknown() {
        let mut result = ParsedResult {
            splits: vec![split("42.0km", Some(42.0))],
            race_total_km: None,
            ..Default::default()
        };
        normalize_labels(&mut result);
        assert_eq!(result.splits[0].point_label, "Finish");
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut result = ParsedResult {
            splits: vec![split("21.0km", Some(21.0))],
            race_total_km: Some(21.1),
            ..Default::default()
        };
        normalize_labels(&mut result);
        let once = result.clone();
        normalize_labels(&mut result);
        assert_eq!(once, result);
    }

    #[test]
    fn unknown_host_falls_back_to_generic_and_has_all_canonical_fields() {
        let result = parse_for_host("example.com", "<html></html>");
        assert!(result.splits.is_empty());
        assert!(result.assets.is_empty());
    }
}
